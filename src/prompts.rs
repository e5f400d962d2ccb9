//! Prompts for the model-backed routines.
//!
//! Keeping every prompt here means wording changes touch exactly one place,
//! and tests can inspect prompts without calling a model.

/// System prompt for transcribing one page image.
///
/// `{language}` is replaced with the document language's English name.
pub const OCR_SYSTEM_PROMPT: &str = r#"You are a precise OCR engine. Transcribe all text visible in the page image.

Rules:
- The document language is {language}. Keep the original language; do not translate.
- Preserve reading order as a human would read the page.
- Keep paragraph breaks. Render tables as plain rows with cells separated by " | ".
- Do not describe images, add commentary or wrap the output in code fences.
- If the page has no text, output nothing."#;

/// System prompt for summarising a document.
pub const SUMMARY_SYSTEM_PROMPT: &str = r#"You are a careful summariser. Summarise the document the user provides.

Rules:
- Write about {words} words in {language}.
- Cover the main purpose, key facts and conclusions. Do not invent content.
- Plain prose paragraphs only: no headings, no bullet lists, no code fences."#;

/// System prompt for translating one chunk of a document.
pub const TRANSLATE_SYSTEM_PROMPT: &str = r#"You are a professional translator. Translate the text the user provides {source} into {target}.

Rules:
- Output only the translation, with no notes or explanations.
- Preserve line breaks, numbers, names and formatting.
- Do not wrap the output in code fences."#;

/// English name of an ISO 639 code (two-letter or Tesseract-style).
pub fn language_name(code: &str) -> &str {
    match code {
        "en" | "eng" => "English",
        "fr" | "fra" => "French",
        "es" | "spa" => "Spanish",
        "de" | "deu" => "German",
        "it" | "ita" => "Italian",
        "pt" | "por" => "Portuguese",
        "ru" | "rus" => "Russian",
        "zh" | "chi_sim" => "Simplified Chinese",
        "chi_tra" => "Traditional Chinese",
        "ja" | "jpn" => "Japanese",
        "ko" | "kor" => "Korean",
        "ar" => "Arabic",
        "hi" => "Hindi",
        other => other,
    }
}

pub fn ocr_prompt(language: &str) -> String {
    OCR_SYSTEM_PROMPT.replace("{language}", language_name(language))
}

pub fn summary_prompt(words: usize, language: &str) -> String {
    SUMMARY_SYSTEM_PROMPT
        .replace("{words}", &words.to_string())
        .replace("{language}", language_name(language))
}

/// `source` of `None` (or "auto") lets the model detect the language.
pub fn translate_prompt(source: Option<&str>, target: &str) -> String {
    let source = match source {
        Some(code) if code != "auto" => format!("from {}", language_name(code)),
        _ => "from its original language".to_string(),
    };
    TRANSLATE_SYSTEM_PROMPT
        .replace("{source}", &source)
        .replace("{target}", language_name(target))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_filled() {
        let p = summary_prompt(300, "fr");
        assert!(p.contains("about 300 words in French"));
        assert!(!p.contains('{'));

        let p = translate_prompt(Some("auto"), "de");
        assert!(p.contains("from its original language into German"));

        assert!(ocr_prompt("chi_tra").contains("Traditional Chinese"));
    }
}
