use crate::{
    convert::{ConvertDirection, ConvertError, ValueConverter},
    value::Value,
};

const ALPHABET_LEN: u8 = 26;

///
/// RotationConverter
///
/// Letter-rotation cipher over ASCII text. Letters rotate within their case,
/// every other ASCII character is kept as-is. `rot13` is its own inverse.
///

#[derive(Clone, Debug)]
pub struct RotationConverter {
    name: String,
    places: u8,
}

impl RotationConverter {
    pub const ROT13: &'static str = "rot13";

    /// Build a named rotation; `places` is reduced modulo the alphabet length.
    pub fn new(name: impl Into<String>, places: u8) -> Self {
        Self {
            name: name.into(),
            places: places % ALPHABET_LEN,
        }
    }

    #[must_use]
    pub fn rot13() -> Self {
        Self::new(Self::ROT13, 13)
    }

    #[must_use]
    pub const fn places(&self) -> u8 {
        self.places
    }

    fn rotate(
        &self,
        value: &Value,
        places: u8,
        direction: ConvertDirection,
    ) -> Result<Value, ConvertError> {
        let text = match value {
            Value::Null => return Ok(Value::Null),
            Value::Text(text) => text,
            other => {
                return Err(ConvertError::out_of_domain(
                    &self.name,
                    direction,
                    other,
                    "expected text",
                ));
            }
        };

        if !text.is_ascii() {
            return Err(ConvertError::out_of_domain(
                &self.name,
                direction,
                value,
                "text must be ASCII",
            ));
        }

        let rotated = text
            .bytes()
            .map(|b| match b {
                b'a'..=b'z' => rotate_byte(b, b'a', places),
                b'A'..=b'Z' => rotate_byte(b, b'A', places),
                _ => b,
            })
            .map(char::from)
            .collect();

        Ok(Value::Text(rotated))
    }
}

const fn rotate_byte(byte: u8, base: u8, places: u8) -> u8 {
    base + (byte - base + places) % ALPHABET_LEN
}

impl ValueConverter for RotationConverter {
    fn name(&self) -> &str {
        &self.name
    }

    fn to_storage(&self, value: &Value) -> Result<Value, ConvertError> {
        self.rotate(value, self.places, ConvertDirection::ToStorage)
    }

    fn to_application(&self, value: &Value) -> Result<Value, ConvertError> {
        self.rotate(
            value,
            (ALPHABET_LEN - self.places) % ALPHABET_LEN,
            ConvertDirection::ToApplication,
        )
    }
}
