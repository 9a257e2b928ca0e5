use scoped_unit_of_work::{EntityKey, Record};
use uuid::Uuid;

/// Sample Widget entity for testing
#[derive(Debug, Clone, PartialEq)]
pub struct Widget {
    pub id: Uuid,
    pub name: String,
    pub quantity: i64,
}

impl Widget {
    pub const ENTITY: &'static str = "widgets";

    pub fn new(name: &str, quantity: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            quantity,
        }
    }

    pub fn key(id: Uuid) -> EntityKey {
        EntityKey::new(Self::ENTITY, id)
    }

    pub fn to_record(&self) -> Record {
        Record::new(
            Self::ENTITY,
            self.id,
            serde_json::json!({ "name": self.name, "quantity": self.quantity }),
        )
    }

    pub fn from_record(record: &Record) -> Option<Self> {
        Some(Self {
            id: record.id,
            name: record.data.get("name")?.as_str()?.to_string(),
            quantity: record.data.get("quantity")?.as_i64()?,
        })
    }
}
