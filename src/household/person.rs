use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// RGBA colour used to tint a person's events. Components live in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "ColorRecord")]
pub struct Color {
    pub red: f64,
    pub green: f64,
    pub blue: f64,
    pub alpha: f64,
}

impl Color {
    pub fn new(red: f64, green: f64, blue: f64, alpha: f64) -> Self {
        Self {
            red: unit(red),
            green: unit(green),
            blue: unit(blue),
            alpha: unit(alpha),
        }
    }
}

#[derive(Deserialize)]
struct ColorRecord {
    red: f64,
    green: f64,
    blue: f64,
    alpha: f64,
}

impl From<ColorRecord> for Color {
    fn from(record: ColorRecord) -> Self {
        Color::new(record.red, record.green, record.blue, record.alpha)
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::new(0.0, 0.0, 1.0, 1.0)
    }
}

fn unit(component: f64) -> f64 {
    if component.is_nan() {
        0.0
    } else {
        component.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub id: String,
    pub name: String,
    pub color: Color,
    pub is_parent: bool,
    pub owner_id: String,
}

impl Person {
    pub fn new(name: impl Into<String>, color: Color, is_parent: bool, owner_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            color,
            is_parent,
            owner_id: owner_id.into(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_person_gets_unique_id() {
        let first = Person::new("Ada", Color::default(), false, "owner");
        let second = Person::new("Ada", Color::default(), false, "owner");

        assert_ne!(first.id, second.id);
    }

    #[test]
    fn color_components_are_clamped_into_unit_range() {
        let color = Color::new(1.4, -0.2, 0.5, f64::NAN);

        assert_eq!(color, Color { red: 1.0, green: 0.0, blue: 0.5, alpha: 0.0 });
    }

    #[test]
    fn default_color_is_opaque_blue() {
        assert_eq!(Color::default(), Color { red: 0.0, green: 0.0, blue: 1.0, alpha: 1.0 });
    }

    #[test]
    fn stored_color_is_clamped_on_load() {
        let json = serde_json::json!({ "red": 3.0, "green": -1.0, "blue": 0.25, "alpha": 1.0 });

        let color: Color = serde_json::from_value(json).unwrap();

        assert_eq!(color, Color { red: 1.0, green: 0.0, blue: 0.25, alpha: 1.0 });
    }

    #[test]
    fn person_serializes_with_camel_case_fields() {
        let person = Person::new("Grace", Color::default(), true, "owner-1").with_id("p1");

        let json = serde_json::to_value(&person).unwrap();

        assert_eq!(json["isParent"], serde_json::json!(true));
        assert_eq!(json["ownerId"], serde_json::json!("owner-1"));
    }
}
