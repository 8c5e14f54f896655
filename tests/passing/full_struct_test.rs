use binmap::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub zip: u32,
}

#[derive(Entity, Default, Debug, Clone, PartialEq)]
#[entity(namespace = "crm", set = "customers")]
pub struct Customer {
    #[key]
    pub id: i64,
    #[index(name = "customer_email", kind = "string")]
    pub email: String,
    #[index(name = "customer_age")]
    pub age: i32,
    pub avatar: Vec<u8>,
    pub address: Address,
    pub preferences_by_channel: HashMap<String, bool>,
    #[transient]
    pub session_token: Option<String>,
}

fn main() {
    let descriptor = Customer::descriptor();
    assert_eq!(descriptor.fields.len(), 7);
    assert!(descriptor.marker.is_some());
    let _key: <Customer as Entity>::Key = 7i64;
}
