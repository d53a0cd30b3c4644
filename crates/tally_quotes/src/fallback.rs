use rand::seq::SliceRandom;

use crate::Quote;

const POOL: &[(&str, &str)] = &[
    ("Believe you can and you're halfway there.", "Theodore Roosevelt"),
    ("The future depends on what you do today.", "Mahatma Gandhi"),
    ("Well done is better than well said.", "Benjamin Franklin"),
    ("What we think, we become.", "Buddha"),
    ("Act as if what you do makes a difference. It does.", "William James"),
    ("Quality is not an act, it is a habit.", "Aristotle"),
    ("It always seems impossible until it's done.", "Nelson Mandela"),
];

/// A real quote from the bundled pool.
pub fn local_quote() -> Quote {
    let (text, author) = POOL
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(POOL[0]);
    Quote::new(text, author)
}
