use binmap::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sku {
    pub vendor: String,
    pub code: u32,
}

#[derive(Entity, Default)]
#[entity(namespace = "stock")]
pub struct Item {
    #[key]
    pub sku: Sku,
    pub quantity: i64,
}

fn main() {
    let key: <Item as Entity>::Key = Sku { vendor: "acme".to_string(), code: 1 };
    assert!(Item::native_key(&key).is_none());
}
