use serde::{Deserialize, Serialize};
use std::fmt;

use super::Meal;

/// Daily macro totals, derived from the current ledger.
///
/// Never stored or adjusted directly: always recomputed as the sum of the
/// ledger's meals. An empty ledger sums to all zeroes.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DailyMacros {
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fats: f64,
}

impl DailyMacros {
    /// Sums the four macro fields across all meals.
    pub fn sum(meals: &[Meal]) -> Self {
        meals.iter().fold(Self::default(), |acc, meal| Self {
            calories: acc.calories + meal.calories,
            protein: acc.protein + meal.protein,
            carbs: acc.carbs + meal.carbs,
            fats: acc.fats + meal.fats,
        })
    }
}

impl fmt::Display for DailyMacros {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} kcal, {}g protein, {}g carbs, {}g fats",
            self.calories, self.protein, self.carbs, self.fats
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MealFields;

    fn meal(name: &str, calories: f64, protein: f64, carbs: f64, fats: f64) -> Meal {
        Meal::from_fields("id", MealFields::new(name, calories, protein, carbs, fats))
    }

    #[test]
    fn test_sum_empty_is_zero() {
        let totals = DailyMacros::sum(&[]);
        assert_eq!(totals, DailyMacros::default());
        assert_eq!(totals.calories, 0.0);
    }

    #[test]
    fn test_sum_two_meals() {
        let meals = vec![
            meal("Breakfast", 500.0, 25.0, 60.0, 15.0),
            meal("Lunch", 300.0, 20.0, 30.0, 10.0),
        ];
        let totals = DailyMacros::sum(&meals);
        assert_eq!(totals.calories, 800.0);
        assert_eq!(totals.protein, 45.0);
        assert_eq!(totals.carbs, 90.0);
        assert_eq!(totals.fats, 25.0);
    }

    #[test]
    fn test_sum_is_order_independent() {
        let a = meal("A", 120.0, 8.0, 14.0, 3.0);
        let b = meal("B", 640.0, 32.0, 70.0, 22.0);
        let c = meal("C", 90.0, 2.0, 20.0, 1.0);

        let forward = DailyMacros::sum(&[a.clone(), b.clone(), c.clone()]);
        let reversed = DailyMacros::sum(&[c, b, a]);
        assert_eq!(forward, reversed);
    }
}
