//! Lexicon-based polarity scoring.
//!
//! Each sentiment-bearing word carries a polarity in [-1, 1]. Intensifiers
//! scale a directly following sentiment word, negations flip and dampen it
//! (x -0.5). The text score is the mean over sentiment words, rounded to two
//! decimals.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

const LEXICON: &[(&str, f64)] = &[
    ("amazing", 0.6),
    ("appreciate", 0.4),
    ("awesome", 1.0),
    ("beautiful", 0.85),
    ("best", 1.0),
    ("better", 0.5),
    ("brilliant", 0.9),
    ("calm", 0.3),
    ("clean", 0.37),
    ("cool", 0.35),
    ("delighted", 0.7),
    ("easy", 0.43),
    ("enjoy", 0.4),
    ("excellent", 1.0),
    ("fantastic", 0.4),
    ("fast", 0.2),
    ("fine", 0.42),
    ("fixed", 0.1),
    ("friendly", 0.38),
    ("glad", 0.5),
    ("good", 0.7),
    ("grateful", 0.6),
    ("great", 0.8),
    ("happy", 0.8),
    ("helpful", 0.5),
    ("impressive", 1.0),
    ("like", 0.2),
    ("love", 0.5),
    ("loved", 0.7),
    ("lovely", 0.5),
    ("nice", 0.6),
    ("perfect", 1.0),
    ("pleasant", 0.73),
    ("pleased", 0.5),
    ("polite", 0.3),
    ("quick", 0.33),
    ("recommend", 0.4),
    ("resolved", 0.3),
    ("satisfied", 0.5),
    ("smooth", 0.4),
    ("solved", 0.3),
    ("super", 0.33),
    ("thank", 0.2),
    ("thanks", 0.2),
    ("useful", 0.3),
    ("wonderful", 1.0),
    ("works", 0.2),
    ("angry", -0.5),
    ("annoyed", -0.4),
    ("annoying", -0.8),
    ("awful", -1.0),
    ("bad", -0.7),
    ("broken", -0.4),
    ("buggy", -0.5),
    ("confused", -0.4),
    ("confusing", -0.3),
    ("crash", -0.4),
    ("crashes", -0.4),
    ("difficult", -0.5),
    ("disappointed", -0.75),
    ("disappointing", -0.6),
    ("dislike", -0.4),
    ("error", -0.2),
    ("fail", -0.5),
    ("failed", -0.5),
    ("frustrated", -0.7),
    ("frustrating", -0.6),
    ("hate", -0.8),
    ("hated", -0.8),
    ("horrible", -1.0),
    ("late", -0.3),
    ("poor", -0.4),
    ("problem", -0.2),
    ("rude", -0.6),
    ("sad", -0.5),
    ("slow", -0.3),
    ("sorry", -0.5),
    ("stupid", -0.8),
    ("terrible", -1.0),
    ("unhappy", -0.6),
    ("useless", -0.5),
    ("worse", -0.4),
    ("worst", -1.0),
    ("wrong", -0.5),
];

const INTENSIFIERS: &[(&str, f64)] = &[
    ("absolutely", 1.5),
    ("extremely", 1.5),
    ("incredibly", 1.5),
    ("really", 1.3),
    ("so", 1.3),
    ("too", 1.3),
    ("very", 1.3),
    ("quite", 1.1),
    ("somewhat", 0.7),
    ("slightly", 0.5),
    ("barely", 0.4),
];

const NEGATIONS: &[&str] = &[
    "not", "no", "never", "nothing", "nobody", "hardly", "without",
];

/// Tokens a negation keeps reaching forward before it lapses.
const NEGATION_REACH: usize = 3;

static POLARITY: LazyLock<HashMap<&'static str, f64>> =
    LazyLock::new(|| LEXICON.iter().copied().collect());
static SCALE: LazyLock<HashMap<&'static str, f64>> =
    LazyLock::new(|| INTENSIFIERS.iter().copied().collect());
static WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z]+(?:'[a-z]+)?").expect("static regex"));

fn is_negation(token: &str) -> bool {
    NEGATIONS.iter().any(|n| *n == token) || token.ends_with("n't")
}

/// Polarity of `text` in [-1.0, 1.0]; 0.0 for empty or neutral text.
pub fn score(text: &str) -> f64 {
    let lowered = text.to_lowercase();
    let mut scores = Vec::new();
    let mut scale = 1.0;
    let mut negation_left = 0usize;

    for m in WORD.find_iter(&lowered) {
        let token = m.as_str();
        if is_negation(token) {
            negation_left = NEGATION_REACH;
            continue;
        }
        if let Some(f) = SCALE.get(token) {
            scale *= f;
            continue;
        }
        if let Some(p) = POLARITY.get(token) {
            let mut v = p * scale;
            if negation_left > 0 {
                v *= -0.5;
            }
            scores.push(v.clamp(-1.0, 1.0));
            scale = 1.0;
            negation_left = 0;
            continue;
        }
        // neutral word: an intensifier only reaches the word right after it
        scale = 1.0;
        negation_left = negation_left.saturating_sub(1);
    }

    if scores.is_empty() {
        return 0.0;
    }
    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
    (mean.clamp(-1.0, 1.0) * 100.0).round() / 100.0 + 0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polarity_direction() {
        assert!(score("I love this") > 0.0);
        assert!(score("I hate this") < 0.0);
        assert_eq!(score(""), 0.0);
    }

    #[test]
    fn neutral_text_scores_zero() {
        assert_eq!(score("My order number is 12345."), 0.0);
        assert_eq!(score("   "), 0.0);
    }

    #[test]
    fn known_words_give_lexicon_values() {
        assert_eq!(score("I love this"), 0.5);
        assert_eq!(score("I hate this"), -0.8);
        assert_eq!(score("GREAT support"), 0.8);
    }

    #[test]
    fn negation_flips_and_dampens() {
        assert_eq!(score("this is not good"), -0.35);
        assert_eq!(score("it isn't bad"), 0.35);
        assert!(score("I don't like it") < 0.0);
    }

    #[test]
    fn negation_lapses_after_a_few_words() {
        assert_eq!(score("no, the screen went dark and then it was good"), 0.7);
    }

    #[test]
    fn intensifiers_scale_and_clamp() {
        assert_eq!(score("very good"), 0.91);
        assert_eq!(score("absolutely awesome"), 1.0);
        assert_eq!(score("slightly annoying"), -0.4);
    }

    #[test]
    fn intensifier_does_not_carry_past_neutral_words() {
        assert_eq!(score("I think so, but it's bad"), -0.7);
        assert_eq!(score("so bad"), -0.91);
        assert_eq!(score("really, really good"), 1.0);
    }

    #[test]
    fn mixed_text_averages() {
        // (0.8 + -0.7) / 2
        assert_eq!(score("great agent, bad app"), 0.05);
    }

    #[test]
    fn result_stays_in_range() {
        for t in ["worst worst worst", "extremely extremely perfect", "not not not"] {
            let s = score(t);
            assert!((-1.0..=1.0).contains(&s), "{t}: {s}");
        }
    }
}
