//! Text normalization: punctuation canonicalization and number spelling.

use super::lang::{classify_body, Script};
use super::segment::collapse_whitespace;

/// Largest integer spelled out as a number; longer digit runs are read digit by digit.
const MAX_SPELLED: u64 = 999_999_999_999;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NumberLang {
    Kazakh,
    Chinese,
    English,
}

impl NumberLang {
    fn for_script(script: Script) -> Self {
        match script {
            Script::Cyrillic => NumberLang::Kazakh,
            Script::Chinese => NumberLang::Chinese,
            _ => NumberLang::English,
        }
    }

    fn point(self) -> &'static str {
        match self {
            NumberLang::Kazakh => "бүтін",
            NumberLang::Chinese => "点",
            NumberLang::English => "point",
        }
    }

    fn separator(self) -> &'static str {
        match self {
            NumberLang::Chinese => "",
            _ => " ",
        }
    }
}

/// Normalizes raw user text before segmentation.
#[derive(Debug, Default, Clone)]
pub struct TextNormalizer;

impl TextNormalizer {
    pub fn new() -> Self {
        Self
    }

    pub fn normalize(&self, text: &str) -> String {
        let canonical: String = text
            .chars()
            .filter(|ch| !ch.is_control() || ch.is_whitespace())
            .map(canonical_punct)
            .collect();
        let canonical = canonical.replace("...", "…");
        let lang = NumberLang::for_script(classify_body(&canonical));
        collapse_whitespace(&spell_numbers(&canonical, lang))
    }
}

fn canonical_punct(ch: char) -> char {
    match ch {
        '“' | '”' | '„' | '«' | '»' => '"',
        '‘' | '’' | '‚' => '\'',
        '–' | '—' | '―' => '-',
        '\u{ff01}'..='\u{ff5e}' => char::from_u32(ch as u32 - 0xfee0).unwrap_or(ch),
        '\u{3000}' => ' ',
        _ => ch,
    }
}

fn spell_numbers(text: &str, lang: NumberLang) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        if !chars[i].is_ascii_digit() {
            out.push(chars[i]);
            i += 1;
            continue;
        }

        let start = i;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
        let int_part: String = chars[start..i].iter().collect();

        let has_fraction = i + 1 < chars.len()
            && chars[i] == '.'
            && chars[i + 1].is_ascii_digit();

        pad_word_boundary(&mut out, lang);
        out.push_str(&spell_integer(&int_part, lang));

        if has_fraction {
            i += 1;
            let frac_start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            let frac: String = chars[frac_start..i].iter().collect();
            out.push_str(lang.separator());
            out.push_str(lang.point());
            out.push_str(lang.separator());
            out.push_str(&spell_digits(&frac, lang));
        }

        if chars.get(i).is_some_and(|ch| ch.is_alphabetic()) && lang != NumberLang::Chinese {
            out.push(' ');
        }
    }
    out
}

fn pad_word_boundary(out: &mut String, lang: NumberLang) {
    if lang == NumberLang::Chinese {
        return;
    }
    if out.chars().last().is_some_and(|ch| ch.is_alphabetic()) {
        out.push(' ');
    }
}

fn spell_integer(digits: &str, lang: NumberLang) -> String {
    if digits.len() > 1 && digits.starts_with('0') {
        return spell_digits(digits, lang);
    }
    match digits.parse::<u64>() {
        Ok(n) if n <= MAX_SPELLED => match lang {
            NumberLang::Kazakh => kazakh_number(n),
            NumberLang::Chinese => chinese_number(n),
            NumberLang::English => english_number(n),
        },
        _ => spell_digits(digits, lang),
    }
}

fn spell_digits(digits: &str, lang: NumberLang) -> String {
    digits
        .chars()
        .filter_map(|ch| ch.to_digit(10))
        .map(|d| match lang {
            NumberLang::Kazakh => KK_UNITS[d as usize],
            NumberLang::Chinese => ZH_DIGITS[d as usize],
            NumberLang::English => EN_UNITS[d as usize],
        })
        .collect::<Vec<_>>()
        .join(lang.separator())
}

const KK_UNITS: [&str; 10] = [
    "нөл", "бір", "екі", "үш", "төрт", "бес", "алты", "жеті", "сегіз", "тоғыз",
];
const KK_TENS: [&str; 10] = [
    "", "он", "жиырма", "отыз", "қырық", "елу", "алпыс", "жетпіс", "сексен", "тоқсан",
];
const KK_SCALES: [&str; 4] = ["", "мың", "миллион", "миллиард"];

fn kazakh_number(n: u64) -> String {
    if n == 0 {
        return KK_UNITS[0].to_string();
    }
    let mut groups = Vec::new();
    let mut rest = n;
    let mut scale = 0;
    while rest > 0 {
        let triplet = (rest % 1000) as usize;
        if triplet > 0 {
            let mut words = kazakh_triplet(triplet);
            if scale > 0 {
                words.push(KK_SCALES[scale].to_string());
            }
            groups.push(words.join(" "));
        }
        rest /= 1000;
        scale += 1;
    }
    groups.reverse();
    groups.join(" ")
}

fn kazakh_triplet(n: usize) -> Vec<String> {
    let mut words = Vec::new();
    let (hundreds, tens, units) = (n / 100, (n / 10) % 10, n % 10);
    if hundreds > 0 {
        if hundreds > 1 {
            words.push(KK_UNITS[hundreds].to_string());
        }
        words.push("жүз".to_string());
    }
    if tens > 0 {
        words.push(KK_TENS[tens].to_string());
    }
    if units > 0 {
        words.push(KK_UNITS[units].to_string());
    }
    words
}

const EN_UNITS: [&str; 20] = [
    "zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten",
    "eleven", "twelve", "thirteen", "fourteen", "fifteen", "sixteen", "seventeen", "eighteen",
    "nineteen",
];
const EN_TENS: [&str; 10] = [
    "", "", "twenty", "thirty", "forty", "fifty", "sixty", "seventy", "eighty", "ninety",
];
const EN_SCALES: [&str; 4] = ["", "thousand", "million", "billion"];

fn english_number(n: u64) -> String {
    if n == 0 {
        return EN_UNITS[0].to_string();
    }
    let mut groups = Vec::new();
    let mut rest = n;
    let mut scale = 0;
    while rest > 0 {
        let triplet = (rest % 1000) as usize;
        if triplet > 0 {
            let mut words = english_triplet(triplet);
            if scale > 0 {
                words.push(' ');
                words.push_str(EN_SCALES[scale]);
            }
            groups.push(words);
        }
        rest /= 1000;
        scale += 1;
    }
    groups.reverse();
    groups.join(" ")
}

fn english_triplet(n: usize) -> String {
    let mut words = Vec::new();
    let (hundreds, rest) = (n / 100, n % 100);
    if hundreds > 0 {
        words.push(format!("{} hundred", EN_UNITS[hundreds]));
    }
    if rest >= 20 {
        let (tens, units) = (rest / 10, rest % 10);
        if units > 0 {
            words.push(format!("{}-{}", EN_TENS[tens], EN_UNITS[units]));
        } else {
            words.push(EN_TENS[tens].to_string());
        }
    } else if rest > 0 {
        words.push(EN_UNITS[rest].to_string());
    }
    words.join(" ")
}

const ZH_DIGITS: [&str; 10] = ["零", "一", "二", "三", "四", "五", "六", "七", "八", "九"];
const ZH_SECTION_UNITS: [&str; 4] = ["", "十", "百", "千"];
const ZH_SECTIONS: [&str; 3] = ["", "万", "亿"];

fn chinese_number(n: u64) -> String {
    if n == 0 {
        return ZH_DIGITS[0].to_string();
    }
    let mut sections = Vec::new();
    let mut rest = n;
    while rest > 0 {
        sections.push((rest % 10_000) as usize);
        rest /= 10_000;
    }

    let mut out = String::new();
    let mut pending_zero = false;
    for (idx, &section) in sections.iter().enumerate().rev() {
        if section == 0 {
            pending_zero = !out.is_empty();
            continue;
        }
        if !out.is_empty() && (pending_zero || section < 1000) {
            out.push_str(ZH_DIGITS[0]);
        }
        out.push_str(&chinese_section(section));
        out.push_str(ZH_SECTIONS[idx]);
        pending_zero = false;
    }

    if let Some(stripped) = out.strip_prefix("一十") {
        out = format!("十{stripped}");
    }
    out
}

fn chinese_section(n: usize) -> String {
    let digits = [n / 1000, (n / 100) % 10, (n / 10) % 10, n % 10];
    let mut out = String::new();
    let mut zero_run = false;
    for (pos, &d) in digits.iter().enumerate() {
        let unit = ZH_SECTION_UNITS[3 - pos];
        if d == 0 {
            zero_run = !out.is_empty();
            continue;
        }
        if zero_run {
            out.push_str(ZH_DIGITS[0]);
            zero_run = false;
        }
        out.push_str(ZH_DIGITS[d]);
        out.push_str(unit);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kazakh_numbers() {
        assert_eq!(kazakh_number(0), "нөл");
        assert_eq!(kazakh_number(15), "он бес");
        assert_eq!(kazakh_number(140), "жүз қырық");
        assert_eq!(kazakh_number(2024), "екі мың жиырма төрт");
        assert_eq!(kazakh_number(1_000_001), "бір миллион бір");
    }

    #[test]
    fn english_numbers() {
        assert_eq!(english_number(7), "seven");
        assert_eq!(english_number(42), "forty-two");
        assert_eq!(english_number(1_305), "one thousand three hundred five");
    }

    #[test]
    fn chinese_numbers() {
        assert_eq!(chinese_number(10), "十");
        assert_eq!(chinese_number(15), "十五");
        assert_eq!(chinese_number(105), "一百零五");
        assert_eq!(chinese_number(2024), "二千零二十四");
        assert_eq!(chinese_number(10_086), "一万零八十六");
        assert_eq!(chinese_number(100_000_001), "一亿零一");
    }

    #[test]
    fn normalizes_kazakh_sentence() {
        let normalizer = TextNormalizer::new();
        assert_eq!(
            normalizer.normalize("Мен 25 жастамын — «шын»"),
            "Мен жиырма бес жастамын - \"шын\""
        );
    }

    #[test]
    fn leading_zero_reads_digits() {
        let normalizer = TextNormalizer::new();
        assert_eq!(normalizer.normalize("code 007"), "code zero zero seven");
    }

    #[test]
    fn decimals_and_fullwidth() {
        let normalizer = TextNormalizer::new();
        assert_eq!(normalizer.normalize("pi is 3.14"), "pi is three point one four");
        assert_eq!(normalizer.normalize("你好！"), "你好!");
    }
}
