mod macros;
mod meal;
mod user;

pub use macros::DailyMacros;
pub use meal::{Meal, MealFields, ValidationError};
pub use user::User;
