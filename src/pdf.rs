//! Minimal single-page PDF writer for the warning-letter artifact.
//!
//! Emits a fixed A4 page with the two standard Helvetica fonts. Nothing here
//! is general-purpose; it covers exactly the text-and-rule layout the letter
//! template needs.

/// A4 in PDF points.
pub const PAGE_WIDTH: f64 = 595.0;
pub const PAGE_HEIGHT: f64 = 842.0;

// Rough advance width of Helvetica as a fraction of the font size. Good
// enough for centering header lines.
const AVG_CHAR_WIDTH: f64 = 0.5;

pub struct PdfBuilder {
    content: String,
}

impl Default for PdfBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfBuilder {
    pub fn new() -> Self {
        PdfBuilder {
            content: String::new(),
        }
    }

    /// Place a line of text with its baseline at `y` points from the page
    /// bottom.
    pub fn text(&mut self, x: f64, y: f64, size: f64, bold: bool, text: &str) {
        let font = if bold { "/F2" } else { "/F1" };
        self.content.push_str(&format!(
            "BT {} {:.1} Tf {:.1} {:.1} Td ({}) Tj ET\n",
            font,
            size,
            x,
            y,
            escape_text(text)
        ));
    }

    pub fn text_centered(&mut self, y: f64, size: f64, bold: bool, text: &str) {
        let est_width = text.chars().count() as f64 * size * AVG_CHAR_WIDTH;
        let x = ((PAGE_WIDTH - est_width) / 2.0).max(0.0);
        self.text(x, y, size, bold, text);
    }

    pub fn hline(&mut self, x1: f64, x2: f64, y: f64, stroke_width: f64) {
        self.content.push_str(&format!(
            "{:.2} w {:.1} {:.1} m {:.1} {:.1} l S\n",
            stroke_width, x1, y, x2, y
        ));
    }

    /// Assemble the document. Object offsets in the xref table are byte
    /// offsets into the output, so the body is built incrementally.
    pub fn finish(self) -> Vec<u8> {
        let mut out: Vec<u8> = Vec::new();
        let mut offsets: Vec<usize> = Vec::new();

        out.extend_from_slice(b"%PDF-1.4\n");

        let objects: Vec<String> = vec![
            "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
            "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
            format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {} {}] \
                 /Resources << /Font << /F1 4 0 R /F2 5 0 R >> >> /Contents 6 0 R >>",
                PAGE_WIDTH as i64, PAGE_HEIGHT as i64
            ),
            "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
            "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica-Bold >>".to_string(),
            format!(
                "<< /Length {} >>\nstream\n{}endstream",
                self.content.len(),
                self.content
            ),
        ];

        for (i, body) in objects.iter().enumerate() {
            offsets.push(out.len());
            out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
        }

        let xref_start = out.len();
        out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
        out.extend_from_slice(b"0000000000 65535 f \n");
        for off in &offsets {
            out.extend_from_slice(format!("{:010} 00000 n \n", off).as_bytes());
        }
        out.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
                objects.len() + 1,
                xref_start
            )
            .as_bytes(),
        );

        out
    }
}

fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '(' => out.push_str("\\("),
            ')' => out.push_str("\\)"),
            '\\' => out.push_str("\\\\"),
            // The standard fonts are Latin-1 only; anything outside gets a
            // visible placeholder rather than a broken content stream.
            c if (c as u32) < 256 => out.push(c),
            _ => out.push('?'),
        }
    }
    out
}
