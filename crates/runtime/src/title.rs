//! Project title derivation from the first user prompt.
//!
//! Placeholder names (the project id) are replaced with a short
//! title-cased phrase: leading request verbs and articles are dropped,
//! the phrase ends at the first connector word, and the result is capped
//! at 50 characters.

const LEADING_NOISE: &[&str] = &[
    "create", "build", "make", "generate", "design", "write", "add", "me", "a", "an", "the",
    "please", "new", "my",
];

const CONNECTORS: &[&str] = &[
    "for", "with", "that", "which", "using", "about", "where", "so", "to",
];

fn title_case_word(word: &str) -> String {
    word.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Derive a display title from a user message. Returns `None` when
/// nothing usable remains.
pub fn derive_title(message: &str) -> Option<String> {
    let words: Vec<&str> = message
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| c.is_ascii_punctuation() && c != '-'))
        .filter(|w| !w.is_empty())
        .collect();

    let mut start = 0;
    while start < words.len() && LEADING_NOISE.contains(&words[start].to_lowercase().as_str()) {
        start += 1;
    }

    let mut kept = Vec::new();
    for word in &words[start..] {
        if CONNECTORS.contains(&word.to_lowercase().as_str()) {
            break;
        }
        kept.push(title_case_word(word));
    }
    if kept.is_empty() {
        return None;
    }

    let mut title = kept.join(" ");
    if title.len() > 50 {
        title.truncate(50);
        title = title.trim_end().to_owned();
    }
    Some(title)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn portfolio_prompt() {
        assert_eq!(
            derive_title("create a portfolio for a photographer").as_deref(),
            Some("Portfolio")
        );
    }

    #[test]
    fn coffee_shop_prompt() {
        assert_eq!(
            derive_title("Build me a coffee-shop landing page").as_deref(),
            Some("Coffee-Shop Landing Page")
        );
    }

    #[test]
    fn caps_at_fifty_chars() {
        let long = "create an extremely comprehensive inventory management dashboard application suite";
        let title = derive_title(long).unwrap();
        assert!(title.len() <= 50);
        assert!(title.starts_with("Extremely"));
    }

    #[test]
    fn pure_noise_yields_none() {
        assert_eq!(derive_title("please make me a"), None);
        assert_eq!(derive_title(""), None);
    }
}
