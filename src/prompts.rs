//! System prompts for LLM-based form-field classification.
//!
//! Callers can override the default via
//! [`crate::config::FormsConfig::system_prompt`]; the constants here are used
//! only when no override is provided. Batch and section context sentences
//! are appended to whichever base prompt is in effect.

use crate::field::FieldType;

/// Default system prompt for classifying OCR'd form pages into fields.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an expert form analyst. You receive the OCR text of one or more pages of a paper or PDF form, together with the positions of the detected text blocks. Your task is to reconstruct the form as a list of fields.

Follow these rules precisely:

1. FIELDS
   - Emit one entry per question or input the form asks the respondent to fill in
   - "label" is the question text exactly as printed, without trailing colons or asterisks
   - "required" is true only when the form marks the field as mandatory (asterisk, "required", "mandatory")
   - "placeholder" is optional example text printed inside or next to the input area

2. TYPES
   - "type" must be one of: {types}
   - Use "radio" when exactly one option may be chosen, "checkbox" when several may be
   - Use "radio-with-other" / "checkbox-with-other" when one option is "Other" with a blank to fill in;
     do NOT list "Other" in "options", set "otherPlaceholder" to the printed hint instead
   - Use "rating" for scales (1-5, stars, Poor … Excellent) and list the scale points in "options"
   - Use "signature" for signature lines and "file" for attachment/upload requests

3. DISPLAY CONTENT
   - Titles, section headers, instructions and disclaimers are "label" fields
   - A "label" field has an empty "label" and carries its text in "richTextContent"
   - "richTextContent" may use only <h1> <h2> <h3> <p> <strong> <em> <ul> <ol> <li> <br>

4. ORDER AND PAGES
   - List fields in reading order, top to bottom
   - "pageNumber" is the page the field appears on
   - "y" is the vertical pixel position of the field's label when known

5. OUTPUT FORMAT
   - Output ONLY a JSON array of field objects
   - Do NOT wrap it in markdown fences
   - Do NOT add commentary or explanations"#;

/// System prompt for classifying a raw image section (vision path).
pub const VISION_SECTION_PROMPT: &str = r#"You are an expert form analyst. The attached image is part of a scanned or photographed form. Reconstruct every field visible in the image as a JSON array.

Each element has: "label", "type", "required", and where applicable "options", "placeholder", "otherPlaceholder", "richTextContent", "confidence" (0-1) and "y" (vertical pixel position within the image).

"type" must be one of: {types}

Titles, headers and instructions are "label" fields with an empty "label" and the text in "richTextContent".
Options named "Other" with a blank are not options: use "radio-with-other" or "checkbox-with-other" instead.

Output ONLY the JSON array, with no markdown fences and no commentary."#;

/// Render the base prompt with the field-type vocabulary substituted.
pub fn render_base_prompt(template: &str) -> String {
    let types = FieldType::ALL
        .iter()
        .map(|t| format!("\"{}\"", t.as_str()))
        .collect::<Vec<_>>()
        .join(", ");
    template.replace("{types}", &types)
}

/// Instruction appended to the system prompt for a page batch.
pub fn batch_context(pages: &[u32]) -> String {
    let list = pages
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "\n\n6. BATCH SCOPE\n   This request covers pages {list} of the document only. \
         Every field you return MUST have \"pageNumber\" set to one of: {list}."
    )
}

/// Instruction appended to the system prompt for one image section.
pub fn section_context(index: usize, total: usize, overlap_px: u32) -> String {
    let position = if index == 0 {
        "the top"
    } else if index + 1 == total {
        "the bottom"
    } else {
        "the middle"
    };
    format!(
        "\n\nThis image is section {} of {} of one tall form ({} part). \
         Consecutive sections overlap by {}px, so fields at the top or bottom edge may also \
         appear in a neighbouring section. Include every field that is fully visible; \
         skip fields cut off at the edge.",
        index + 1,
        total,
        position,
        overlap_px
    )
}

/// User message that carries the OCR text of a batch.
pub fn ocr_user_message(page_texts: &[(u32, &str)]) -> String {
    let mut out = String::from("Form text by page:\n");
    for (page, text) in page_texts {
        out.push_str(&format!("\n--- Page {page} ---\n{}\n", text.trim()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_prompt_lists_every_type() {
        let prompt = render_base_prompt(DEFAULT_SYSTEM_PROMPT);
        assert!(!prompt.contains("{types}"));
        for t in FieldType::ALL {
            assert!(prompt.contains(&format!("\"{}\"", t.as_str())), "missing {t}");
        }
    }

    #[test]
    fn batch_context_names_pages() {
        let ctx = batch_context(&[6, 7, 8]);
        assert!(ctx.contains("pages 6, 7, 8"));
        assert!(ctx.contains("pageNumber"));
    }

    #[test]
    fn section_context_positions() {
        assert!(section_context(0, 3, 200).contains("top"));
        assert!(section_context(1, 3, 200).contains("middle"));
        assert!(section_context(2, 3, 200).contains("section 3 of 3"));
    }

    #[test]
    fn ocr_user_message_separates_pages() {
        let msg = ocr_user_message(&[(1, "Name: ____ "), (2, "Signature")]);
        assert!(msg.contains("--- Page 1 ---\nName: ____\n"));
        assert!(msg.contains("--- Page 2 ---"));
    }
}
