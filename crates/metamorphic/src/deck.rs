//! Weighted card deck
//!
//! Each entry `i` with weight `w` contributes `w` cards. Cards are dealt
//! without replacement from a shuffled deck, which is reshuffled once
//! exhausted. Over every full pass each entry is drawn exactly `w` times,
//! giving exact long-run frequencies with random local order.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// Shuffled deck of weighted entries
#[derive(Debug, Clone)]
pub struct Deck {
    cards: Vec<usize>,
    index: usize,
}

impl Deck {
    /// Build a deck from per-entry weights
    pub fn new(weights: &[u32]) -> Self {
        let cards: Vec<usize> = weights
            .iter()
            .enumerate()
            .flat_map(|(i, &w)| std::iter::repeat(i).take(w as usize))
            .collect();
        let index = cards.len();
        Deck { cards, index }
    }

    /// Total number of cards per pass
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    /// True when every weight was zero
    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// Deal the next card; `None` if the deck has no cards at all
    pub fn draw(&mut self, rng: &mut StdRng) -> Option<usize> {
        if self.cards.is_empty() {
            return None;
        }
        if self.index == self.cards.len() {
            self.cards.shuffle(rng);
            self.index = 0;
        }
        let card = self.cards[self.index];
        self.index += 1;
        Some(card)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_full_pass_matches_weights() {
        let mut deck = Deck::new(&[3, 0, 5, 1]);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(deck.len(), 9);

        for _pass in 0..4 {
            let mut counts = [0usize; 4];
            for _ in 0..deck.len() {
                counts[deck.draw(&mut rng).unwrap()] += 1;
            }
            assert_eq!(counts, [3, 0, 5, 1]);
        }
    }

    #[test]
    fn test_empty_deck() {
        let mut deck = Deck::new(&[0, 0]);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(deck.is_empty());
        assert_eq!(deck.draw(&mut rng), None);
    }

    #[test]
    fn test_deterministic_for_seed() {
        let weights = [10, 20, 30];
        let draw_all = |seed| {
            let mut deck = Deck::new(&weights);
            let mut rng = StdRng::seed_from_u64(seed);
            (0..100).map(|_| deck.draw(&mut rng).unwrap()).collect::<Vec<_>>()
        };
        assert_eq!(draw_all(5), draw_all(5));
        assert_ne!(draw_all(5), draw_all(6));
    }
}
