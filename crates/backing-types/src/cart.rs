use serde::{Deserialize, Serialize};

use crate::model::RewardTier;
use crate::money::Yen;

/// One selected reward with its price snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub reward_id: String,
    pub quantity: u32,
    pub unit_price: Yen,
    #[serde(default)]
    pub requires_shipping: bool,
}

impl CartLine {
    pub fn for_reward(reward: &RewardTier, quantity: u32) -> Self {
        Self {
            reward_id: reward.reward_id.clone(),
            quantity,
            unit_price: reward.unit_price,
            requires_shipping: reward.requires_shipping,
        }
    }

    pub fn line_total(&self) -> Yen {
        self.unit_price.times(self.quantity)
    }
}

/// A reward and quantity as chosen by the client, before prices are attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardSelection {
    pub reward_id: String,
    pub quantity: u32,
}

/// The backer's selection, at most one line per reward.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cart {
    lines: Vec<CartLine>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Adds a reward; selecting an already present reward accumulates quantity.
    pub fn add(&mut self, reward: &RewardTier, quantity: u32) {
        if quantity == 0 {
            return;
        }
        match self.lines.iter_mut().find(|l| l.reward_id == reward.reward_id) {
            Some(line) => line.quantity = line.quantity.saturating_add(quantity),
            None => self.lines.push(CartLine::for_reward(reward, quantity)),
        }
    }

    /// Sets a line's quantity. Zero or negative removes the line.
    pub fn update_quantity(&mut self, reward_id: &str, quantity: i64) {
        if quantity <= 0 {
            self.remove(reward_id);
            return;
        }
        let quantity = u32::try_from(quantity).unwrap_or(u32::MAX);
        if let Some(line) = self.lines.iter_mut().find(|l| l.reward_id == reward_id) {
            line.quantity = quantity;
        }
    }

    pub fn remove(&mut self, reward_id: &str) {
        self.lines.retain(|l| l.reward_id != reward_id);
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// True iff any selected reward ships physically.
    pub fn requires_shipping(&self) -> bool {
        self.lines.iter().any(|l| l.requires_shipping)
    }
}

impl From<Vec<CartLine>> for Cart {
    fn from(lines: Vec<CartLine>) -> Self {
        let mut cart = Cart::new();
        for line in lines {
            match cart.lines.iter_mut().find(|l| l.reward_id == line.reward_id) {
                Some(existing) => {
                    existing.quantity = existing.quantity.saturating_add(line.quantity)
                }
                None if line.quantity > 0 => cart.lines.push(line),
                None => {}
            }
        }
        cart
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reward(id: &str, price: u64, ships: bool) -> RewardTier {
        RewardTier {
            reward_id: id.to_string(),
            title: format!("Reward {id}"),
            unit_price: Yen::new(price),
            description: String::new(),
            requires_shipping: ships,
            image_url: None,
        }
    }

    #[test]
    fn adding_same_reward_merges_quantity() {
        let r1 = reward("R001", 3000, false);
        let mut cart = Cart::new();
        cart.add(&r1, 1);
        cart.add(&r1, 2);
        assert_eq!(cart.lines().len(), 1);
        assert_eq!(cart.lines()[0].quantity, 3);
    }

    #[test]
    fn non_positive_quantity_removes_line() {
        let mut cart = Cart::new();
        cart.add(&reward("R001", 3000, false), 2);
        cart.add(&reward("R002", 5000, true), 1);
        cart.update_quantity("R001", 0);
        assert_eq!(cart.lines().len(), 1);
        cart.update_quantity("R002", -4);
        assert!(cart.is_empty());
    }

    #[test]
    fn shipping_required_if_any_line_ships() {
        let mut cart = Cart::new();
        cart.add(&reward("R001", 3000, false), 1);
        assert!(!cart.requires_shipping());
        cart.add(&reward("R002", 5000, true), 1);
        assert!(cart.requires_shipping());
        cart.remove("R002");
        assert!(!cart.requires_shipping());
    }

    #[test]
    fn from_lines_collapses_duplicates() {
        let r = reward("R001", 100, false);
        let cart = Cart::from(vec![
            CartLine::for_reward(&r, 1),
            CartLine::for_reward(&r, 4),
        ]);
        assert_eq!(cart.lines().len(), 1);
        assert_eq!(cart.lines()[0].quantity, 5);
    }
}
