use std::collections::HashMap;

use snmp_proto::{Bytes, Oid, Value};

/// Scalar bound to an object identifier for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixtureValue {
    Integer(i64),
    Text(String),
}

impl FixtureValue {
    pub fn to_wire(&self) -> Value {
        match self {
            FixtureValue::Integer(value) => Value::Integer(*value),
            FixtureValue::Text(text) => Value::OctetString(Bytes::copy_from_slice(text.as_bytes())),
        }
    }
}

/// Read-only table answering simulated management queries.
///
/// Built once at start-up and shared by reference into the responder.
/// There is deliberately no update path.
#[derive(Debug)]
pub struct FixtureStore {
    entries: HashMap<Oid, FixtureValue>,
}

impl FixtureStore {
    /// The built-in table simulating a minimal managed device.
    pub fn builtin() -> Self {
        Self::from_entries([
            (well_known::sys_uptime(), FixtureValue::Integer(12345)),
            (well_known::sys_name(), FixtureValue::Text("FakeHost".to_owned())),
        ])
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (Oid, FixtureValue)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    pub fn get(&self, name: &Oid) -> Option<&FixtureValue> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Well-known scalar identifiers simulated by the built-in table.
pub mod well_known {
    use super::*;

    pub fn sys_uptime() -> Oid {
        Oid::parse_str("1.3.6.1.2.1.1.3.0").expect("well-known OID")
    }

    pub fn sys_name() -> Oid {
        Oid::parse_str("1.3.6.1.2.1.1.5.0").expect("well-known OID")
    }
}
