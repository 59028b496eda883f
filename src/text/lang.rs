use std::fmt;

/// Dominant writing system of a piece of text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Script {
    Latin,
    /// Kazakh or Russian Cyrillic.
    Cyrillic,
    Chinese,
    Mixed,
    /// No Latin, Cyrillic or CJK letters at all.
    Unknown,
}

impl Script {
    pub fn as_str(self) -> &'static str {
        match self {
            Script::Latin => "latin",
            Script::Cyrillic => "cyrillic",
            Script::Chinese => "chinese",
            Script::Mixed => "mixed",
            Script::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Letter counts per script.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScriptCounts {
    pub latin: usize,
    pub cyrillic: usize,
    pub chinese: usize,
}

impl ScriptCounts {
    pub fn of(text: &str) -> Self {
        let mut counts = Self::default();
        for ch in text.chars() {
            if ch.is_ascii_alphabetic() {
                counts.latin += 1;
            } else if is_cyrillic(ch) {
                counts.cyrillic += 1;
            } else if is_cjk(ch) {
                counts.chinese += 1;
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.latin + self.cyrillic + self.chinese
    }

    fn ratios(&self) -> Option<(f64, f64, f64)> {
        let total = self.total();
        if total == 0 {
            return None;
        }
        let total = total as f64;
        Some((
            self.latin as f64 / total,
            self.cyrillic as f64 / total,
            self.chinese as f64 / total,
        ))
    }
}

/// Cyrillic letters including the Kazakh-specific ones.
pub fn is_cyrillic(ch: char) -> bool {
    matches!(ch, 'а'..='я' | 'А'..='Я' | 'ё' | 'Ё')
        || "әіңғүұқөһӘІҢҒҮҰҚӨҺ".contains(ch)
}

/// CJK unified ideographs (basic block).
pub fn is_cjk(ch: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&ch)
}

/// Classify a voice-prompt transcript.
///
/// Cyrillic wins at a low share because Kazakh prompts routinely carry
/// English terms.
pub fn classify_prompt(text: &str) -> Script {
    match ScriptCounts::of(text).ratios() {
        None => Script::Unknown,
        Some((_, cyr, _)) if cyr > 0.2 => Script::Cyrillic,
        Some((_, _, zh)) if zh > 0.2 => Script::Chinese,
        Some((lat, _, _)) if lat > 0.6 => Script::Latin,
        Some(_) => Script::Mixed,
    }
}

/// Classify a synthesis body to pick a segmentation strategy.
pub fn classify_body(text: &str) -> Script {
    match ScriptCounts::of(text).ratios() {
        None => Script::Unknown,
        Some((lat, _, _)) if lat > 0.6 => Script::Latin,
        Some((_, cyr, _)) if cyr > 0.3 => Script::Cyrillic,
        Some((_, _, zh)) if zh > 0.3 => Script::Chinese,
        Some(_) => Script::Mixed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_kazakh_letters_as_cyrillic() {
        let counts = ScriptCounts::of("Қазақстан әні");
        assert_eq!(counts.cyrillic, 12);
        assert_eq!(counts.latin, 0);
    }

    #[test]
    fn prompt_prefers_cyrillic_at_low_share() {
        // 3 cyrillic of 10 letters
        assert_eq!(classify_prompt("Сәл abcdefg"), Script::Cyrillic);
        assert_eq!(classify_prompt("hello world"), Script::Latin);
        assert_eq!(classify_prompt("你好世界"), Script::Chinese);
        assert_eq!(classify_prompt("1234 !!"), Script::Unknown);
    }

    #[test]
    fn body_prefers_latin_majority() {
        // 3 cyrillic of 10 letters is not enough for the body classifier
        assert_eq!(classify_body("Сәл abcdefg"), Script::Latin);
        assert_eq!(classify_body("Сәлем! 欢迎使用"), Script::Cyrillic);
        assert_eq!(classify_body("ab 你好吗"), Script::Chinese);
    }

    #[test]
    fn mixed_when_nothing_dominates() {
        // cyrillic 0.25 clears the prompt threshold first
        assert_eq!(classify_prompt("abcd 你好 Ты"), Script::Cyrillic);
        assert_eq!(classify_prompt("abcd 你好吗"), Script::Chinese);
        // body: latin 0.5, cyrillic 0.25, chinese 0.25
        assert_eq!(classify_body("abcd 你好 Ты"), Script::Mixed);
    }
}
