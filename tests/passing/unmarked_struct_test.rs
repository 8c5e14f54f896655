use binmap::*;

#[derive(Entity, Default)]
struct Plain {
    name: String,
}

fn main() {
    assert!(Plain::descriptor().marker.is_none());
    assert_eq!(Plain::descriptor().fields[0].declared, DeclaredType::Text);
}
