//! Product name normalization used to group catalog entries.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static TOKEN_SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Decorative words removed from product names before grouping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NameMarkers {
    /// Container qualifiers, removed wherever they appear.
    pub qualifiers: Vec<String>,
    /// Category words, removed only as the leading word.
    pub category_prefixes: Vec<String>,
}

impl Default for NameMarkers {
    fn default() -> Self {
        Self {
            qualifiers: ["full", "empty", "cheio", "cheia", "vazio", "vazia"]
                .into_iter()
                .map(String::from)
                .collect(),
            category_prefixes: ["gas", "agua", "water"].into_iter().map(String::from).collect(),
        }
    }
}

impl NameMarkers {
    fn is_qualifier(&self, token: &str) -> bool {
        self.qualifiers.iter().any(|q| q.eq_ignore_ascii_case(token))
    }

    fn is_category(&self, token: &str) -> bool {
        self.category_prefixes.iter().any(|c| c.eq_ignore_ascii_case(token))
    }
}

/// Normalize a display name into a grouping key.
///
/// Accented letters fold to ASCII and any other non-ASCII character is dropped,
/// so mis-decoded names ("BotijÃ£o") land on the same key as clean ones.
pub fn normalize_name(name: &str, markers: &NameMarkers) -> String {
    let folded: String = name.chars().filter_map(fold_char).collect::<String>().to_ascii_lowercase();

    let tokens: Vec<&str> = TOKEN_SEPARATOR
        .split(&folded)
        .filter(|t| !t.is_empty())
        .collect();

    let mut kept: Vec<&str> = tokens.iter().copied().filter(|t| !markers.is_qualifier(t)).collect();
    if kept.len() > 1 && markers.is_category(kept[0]) {
        kept.remove(0);
    }

    if kept.is_empty() {
        tokens.join(" ")
    } else {
        kept.join(" ")
    }
}

fn fold_char(c: char) -> Option<char> {
    if c.is_ascii() {
        return Some(c);
    }
    let folded = match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => 'a',
        'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' | 'Ā' | 'Ă' | 'Ą' => 'A',
        'ç' | 'ć' | 'č' => 'c',
        'Ç' | 'Ć' | 'Č' => 'C',
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ė' | 'ę' | 'ě' => 'e',
        'È' | 'É' | 'Ê' | 'Ë' | 'Ē' | 'Ė' | 'Ę' | 'Ě' => 'E',
        'ì' | 'í' | 'î' | 'ï' | 'ī' | 'į' => 'i',
        'Ì' | 'Í' | 'Î' | 'Ï' | 'Ī' | 'Į' => 'I',
        'ñ' | 'ń' | 'ň' => 'n',
        'Ñ' | 'Ń' | 'Ň' => 'N',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' | 'ő' => 'o',
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' | 'Ø' | 'Ō' | 'Ő' => 'O',
        'ù' | 'ú' | 'û' | 'ü' | 'ū' | 'ů' | 'ű' => 'u',
        'Ù' | 'Ú' | 'Û' | 'Ü' | 'Ū' | 'Ů' | 'Ű' => 'U',
        'ý' | 'ÿ' => 'y',
        'Ý' | 'Ÿ' => 'Y',
        'š' | 'ś' => 's',
        'Š' | 'Ś' => 'S',
        'ž' | 'ź' | 'ż' => 'z',
        'Ž' | 'Ź' | 'Ż' => 'Z',
        _ => return None,
    };
    Some(folded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(name: &str) -> String {
        normalize_name(name, &NameMarkers::default())
    }

    #[test]
    fn strips_qualifiers_and_category_prefix() {
        assert_eq!(norm("Gás P13 (Cheio)"), "p13");
        assert_eq!(norm("P13 Vazio"), "p13");
        assert_eq!(norm("  gas  p13  [EMPTY] "), "p13");
        assert_eq!(norm("Água Mineral 20L"), "mineral 20l");
    }

    #[test]
    fn diacritics_and_encoding_artifacts_collapse() {
        assert_eq!(norm("Botijão P45"), "botijao p45");
        assert_eq!(norm("BOTIJÃO P45"), "botijao p45");
        assert_eq!(norm("BotijÃ£o P45"), "botijao p45");
    }

    #[test]
    fn category_word_alone_is_kept() {
        assert_eq!(norm("Gás"), "gas");
        assert_eq!(norm("Gás (Cheio)"), "gas");
    }

    #[test]
    fn only_markers_falls_back_to_all_tokens() {
        assert_eq!(norm("(Full)"), "full");
    }

    #[test]
    fn custom_markers_are_honoured() {
        let markers = NameMarkers {
            qualifiers: vec!["refill".to_string()],
            category_prefixes: vec![],
        };
        assert_eq!(normalize_name("Gas P13 Refill", &markers), "gas p13");
    }
}
