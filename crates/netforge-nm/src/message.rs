use indexmap::IndexMap;

use crate::value::NmValue;

/// An ordered mapping from field names to typed values.
///
/// Insertion order is preserved and carried on the wire. Field names
/// must be 1–255 bytes; the encoder enforces that.
#[derive(Default, Clone, Debug, PartialEq)]
pub struct NmMessage {
    fields: IndexMap<String, NmValue>,
}

impl NmMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&NmValue> {
        self.fields.get(name)
    }

    /// Inserts or replaces a field.
    pub fn set(&mut self, name: impl Into<String>, value: NmValue) {
        self.fields.insert(name.into(), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<NmValue> {
        self.fields.shift_remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &NmValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn clear(&mut self) {
        self.fields.clear();
    }

    pub fn set_i8(&mut self, name: impl Into<String>, v: i8) {
        self.set(name, NmValue::Int8(v));
    }

    pub fn set_u8(&mut self, name: impl Into<String>, v: u8) {
        self.set(name, NmValue::UInt8(v));
    }

    pub fn set_i16(&mut self, name: impl Into<String>, v: i16) {
        self.set(name, NmValue::Int16(v));
    }

    pub fn set_u16(&mut self, name: impl Into<String>, v: u16) {
        self.set(name, NmValue::UInt16(v));
    }

    pub fn set_i32(&mut self, name: impl Into<String>, v: i32) {
        self.set(name, NmValue::Int32(v));
    }

    pub fn set_u32(&mut self, name: impl Into<String>, v: u32) {
        self.set(name, NmValue::UInt32(v));
    }

    pub fn set_i64(&mut self, name: impl Into<String>, v: i64) {
        self.set(name, NmValue::Int64(v));
    }

    pub fn set_u64(&mut self, name: impl Into<String>, v: u64) {
        self.set(name, NmValue::UInt64(v));
    }

    pub fn set_bool(&mut self, name: impl Into<String>, v: bool) {
        self.set(name, NmValue::Bool(v));
    }

    pub fn set_char(&mut self, name: impl Into<String>, v: u8) {
        self.set(name, NmValue::Char(v));
    }

    pub fn set_schar(&mut self, name: impl Into<String>, v: i8) {
        self.set(name, NmValue::SChar(v));
    }

    pub fn set_uchar(&mut self, name: impl Into<String>, v: u8) {
        self.set(name, NmValue::UChar(v));
    }

    pub fn set_f32(&mut self, name: impl Into<String>, v: f32) {
        self.set(name, NmValue::Float(v));
    }

    pub fn set_f64(&mut self, name: impl Into<String>, v: f64) {
        self.set(name, NmValue::Double(v));
    }

    pub fn set_str(&mut self, name: impl Into<String>, v: impl Into<String>) {
        self.set(name, NmValue::Str(v.into()));
    }

    pub fn set_blob(&mut self, name: impl Into<String>, v: Vec<u8>) {
        self.set(name, NmValue::Blob(v));
    }

    pub fn get_i8(&self, name: &str) -> Option<i8> {
        self.get(name)?.as_i8()
    }

    pub fn get_u8(&self, name: &str) -> Option<u8> {
        self.get(name)?.as_u8()
    }

    pub fn get_i16(&self, name: &str) -> Option<i16> {
        self.get(name)?.as_i16()
    }

    pub fn get_u16(&self, name: &str) -> Option<u16> {
        self.get(name)?.as_u16()
    }

    pub fn get_i32(&self, name: &str) -> Option<i32> {
        self.get(name)?.as_i32()
    }

    pub fn get_u32(&self, name: &str) -> Option<u32> {
        self.get(name)?.as_u32()
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name)?.as_i64()
    }

    pub fn get_u64(&self, name: &str) -> Option<u64> {
        self.get(name)?.as_u64()
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name)?.as_bool()
    }

    pub fn get_char(&self, name: &str) -> Option<u8> {
        self.get(name)?.as_char()
    }

    pub fn get_schar(&self, name: &str) -> Option<i8> {
        self.get(name)?.as_schar()
    }

    pub fn get_uchar(&self, name: &str) -> Option<u8> {
        self.get(name)?.as_uchar()
    }

    pub fn get_f32(&self, name: &str) -> Option<f32> {
        self.get(name)?.as_f32()
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name)?.as_f64()
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name)?.as_str()
    }

    pub fn get_blob(&self, name: &str) -> Option<&[u8]> {
        self.get(name)?.as_blob()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insertion_order_is_preserved() {
        let mut msg = NmMessage::new();
        msg.set_u8("z", 1);
        msg.set_u8("a", 2);
        msg.set_u8("m", 3);
        let names: Vec<_> = msg.iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["z", "a", "m"]);
    }

    #[test]
    fn set_replaces_in_place() {
        let mut msg = NmMessage::new();
        msg.set_i32("n", 1);
        msg.set_i32("n", 2);
        assert_eq!(msg.len(), 1);
        assert_eq!(msg.get_i32("n"), Some(2));
    }

    #[test]
    fn typed_getters_reject_other_types() {
        let mut msg = NmMessage::new();
        msg.set_str("s", "text");
        assert_eq!(msg.get_str("s"), Some("text"));
        assert_eq!(msg.get_i32("s"), None);
        assert_eq!(msg.get_str("missing"), None);
    }
}
