use serde::{Deserialize, Serialize};
use std::fmt;

/// A meal recorded for a single day.
///
/// The `id` is assigned by the remote store on first save. An empty id marks
/// a draft that has not been persisted yet; once assigned, the id never
/// changes (edits replace fields, not identity).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meal {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fats: f64,
}

impl Meal {
    /// Builds a persisted meal from a store-assigned id and its fields.
    pub fn from_fields(id: impl Into<String>, fields: MealFields) -> Self {
        Self {
            id: id.into(),
            name: fields.name,
            calories: fields.calories,
            protein: fields.protein,
            carbs: fields.carbs,
            fats: fields.fats,
        }
    }

    /// True if the meal has not been saved to the remote store yet.
    pub fn is_draft(&self) -> bool {
        self.id.is_empty()
    }

    /// The id-less payload for insert/update calls.
    pub fn fields(&self) -> MealFields {
        MealFields {
            name: self.name.clone(),
            calories: self.calories,
            protein: self.protein,
            carbs: self.carbs,
            fats: self.fats,
        }
    }
}

impl fmt::Display for Meal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} kcal ({}g protein, {}g carbs, {}g fats)",
            self.name, self.calories, self.protein, self.carbs, self.fats
        )
    }
}

/// The editable fields of a meal, without identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealFields {
    pub name: String,
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fats: f64,
}

impl MealFields {
    pub fn new(name: impl Into<String>, calories: f64, protein: f64, carbs: f64, fats: f64) -> Self {
        Self {
            name: name.into(),
            calories,
            protein,
            carbs,
            fats,
        }
    }

    /// Fallback payload used when AI estimation fails or returns garbage.
    pub fn placeholder() -> Self {
        Self::new("Meal", 0.0, 0.0, 0.0, 0.0)
    }

    /// Local validation, run before any network call.
    ///
    /// The name must be non-blank and every numeric field must be a finite
    /// number that is zero or greater.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::BlankName);
        }
        for (field, value) in [
            ("calories", self.calories),
            ("protein", self.protein),
            ("carbs", self.carbs),
            ("fats", self.fats),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ValidationError::BadAmount(field));
            }
        }
        Ok(())
    }
}

/// Rejections from local meal validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Meal name is empty or whitespace.
    BlankName,
    /// A numeric field is negative or not a finite number.
    BadAmount(&'static str),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::BlankName => write!(f, "meal name cannot be blank"),
            ValidationError::BadAmount(field) => {
                write!(f, "{} must be zero or greater", field)
            }
        }
    }
}

impl std::error::Error for ValidationError {}
