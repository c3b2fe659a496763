//! Spatial prompting: render OCR block geometry into a classifier hint.
//!
//! Raw OCR text loses layout. Block positions and sizes are enough to tell a
//! title from a section header from a field label, so a sample of blocks is
//! listed with coordinates alongside a fixed set of reading rules.

use crate::field::TextBlock;

/// Vertical distance under which two blocks are treated as one visual row.
pub const ROW_TOLERANCE_PX: f32 = 10.0;

const LAYOUT_RULES: &str = "\
Layout rules for interpreting the blocks above:
- A block with large height or width near the top of the first page is the form title.
- A block of medium height that stands alone and does not end with a colon is a section header.
- Long or multi-line text is an instruction or disclaimer (a \"label\" field).
- Text ending in a colon followed by an input area at a similar y-coordinate is a field label.
- A run of check boxes, option glyphs or repeated short phrases in the same y-band are the options of one field.
- Blocks whose y-coordinates differ by less than 10px belong to the same visual row.";

/// Render up to `sample_size` blocks plus the layout rules.
///
/// Blocks are numbered from 1 in the order given. Returns an empty string
/// when there are no blocks, so callers can append unconditionally.
pub fn build_hint(blocks: &[TextBlock], sample_size: usize) -> String {
    if blocks.is_empty() || sample_size == 0 {
        return String::new();
    }

    let mut out = String::from("\n\nSPATIAL LAYOUT (OCR text blocks with x, y, width, height in pixels):\n");
    for (i, block) in blocks.iter().take(sample_size).enumerate() {
        let b = &block.bounding_box;
        out.push_str(&format!(
            "Block {}: \"{}\" at ({}, {}, {}, {})\n",
            i + 1,
            block.text.replace('"', "'").replace('\n', " "),
            b.x.round(),
            b.y.round(),
            b.width.round(),
            b.height.round()
        ));
    }
    if blocks.len() > sample_size {
        out.push_str(&format!(
            "({} more blocks omitted)\n",
            blocks.len() - sample_size
        ));
    }
    out.push('\n');
    out.push_str(LAYOUT_RULES);
    out
}

/// `true` when two blocks sit in the same visual row.
pub fn same_row(a: &TextBlock, b: &TextBlock) -> bool {
    (a.bounding_box.y - b.bounding_box.y).abs() < ROW_TOLERANCE_PX
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::BoundingBox;

    fn block(text: &str, x: f32, y: f32) -> TextBlock {
        TextBlock::new(
            text,
            BoundingBox {
                x,
                y,
                width: 50.0,
                height: 15.0,
            },
            1,
        )
    }

    #[test]
    fn renders_numbered_blocks_with_geometry() {
        let hint = build_hint(&[block("Name:", 10.0, 20.0)], 50);
        assert!(hint.contains("Block 1: \"Name:\" at (10, 20, 50, 15)"), "{hint}");
        assert!(hint.contains("same visual row"));
    }

    #[test]
    fn sample_size_caps_blocks() {
        let blocks: Vec<_> = (0..5).map(|i| block(&format!("b{i}"), 0.0, i as f32 * 20.0)).collect();
        let hint = build_hint(&blocks, 2);
        assert!(hint.contains("Block 2:"));
        assert!(!hint.contains("Block 3:"));
        assert!(hint.contains("3 more blocks omitted"));
    }

    #[test]
    fn no_blocks_no_hint() {
        assert_eq!(build_hint(&[], 50), "");
    }

    #[test]
    fn row_tolerance() {
        assert!(same_row(&block("a", 0.0, 100.0), &block("b", 200.0, 109.0)));
        assert!(!same_row(&block("a", 0.0, 100.0), &block("b", 200.0, 111.0)));
    }
}
