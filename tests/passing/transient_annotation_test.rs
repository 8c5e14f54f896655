use binmap::*;

#[derive(Default)]
pub struct NotSerializable;

#[derive(Entity, Default)]
#[entity(namespace = "cache", set = "sessions")]
pub struct Session {
    #[key]
    pub token: String,
    pub user_id: i64,
    #[transient]
    pub handle: NotSerializable,
}

fn main() {
    let session = Session { token: "t".to_string(), user_id: 1, handle: NotSerializable };
    assert_eq!(session.native_value(1), Some(Value::Int(1)));
    assert!(Session::descriptor().fields[2].transient);
}
