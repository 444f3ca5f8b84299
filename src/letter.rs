//! Warning-letter tiers, numbering and the rendered PDF template.

use crate::pdf::PdfBuilder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Tier1,
    Tier2,
    Tier3,
}

impl Tier {
    /// Code used in letter numbers, stored rows and artifact filenames.
    pub fn code(self) -> &'static str {
        match self {
            Tier::Tier1 => "SP1",
            Tier::Tier2 => "SP2",
            Tier::Tier3 => "SP3",
        }
    }

    pub fn from_code(code: &str) -> Option<Tier> {
        match code {
            "SP1" => Some(Tier::Tier1),
            "SP2" => Some(Tier::Tier2),
            "SP3" => Some(Tier::Tier3),
            _ => None,
        }
    }
}

/// Tier thresholds over the accumulated point total. A total of zero is not
/// eligible for any letter.
pub fn classify(point_total: i64) -> Option<Tier> {
    if point_total >= 100 {
        Some(Tier::Tier3)
    } else if point_total >= 50 {
        Some(Tier::Tier2)
    } else if point_total >= 1 {
        Some(Tier::Tier1)
    } else {
        None
    }
}

/// Letter numbers are `<code>/<year>/<seq>` with a per-(tier, year)
/// monotonic sequence, e.g. `SP2/2026/0007`.
pub fn format_letter_no(tier: Tier, year: i32, seq: i64) -> String {
    format!("{}/{}/{:04}", tier.code(), year, seq)
}

#[derive(Debug, Clone)]
pub struct RecentViolation {
    pub name: String,
    pub points: i64,
}

pub struct LetterInput<'a> {
    pub student_name: &'a str,
    pub external_id: &'a str,
    pub tier: Tier,
    pub point_total: i64,
    pub letter_no: &'a str,
    pub date: &'a str,
    pub violations: &'a [RecentViolation],
}

fn consequence_paragraph(tier: Tier) -> &'static str {
    match tier {
        Tier::Tier1 => {
            "With this first warning we ask that you give your child closer \
             guidance so that no further violations occur."
        }
        Tier::Tier2 => {
            "With this second warning, any further violation will result in \
             more severe sanctions."
        }
        Tier::Tier3 => {
            "With this third warning, any further violation will result in \
             the student being returned to the care of their parent or guardian."
        }
    }
}

/// Plain-text rendering of the letter body, one entry per visual line. The
/// PDF layout below places the same lines; keeping this separate lets the
/// record row and tests inspect the text without parsing the artifact.
pub fn letter_lines(input: &LetterInput) -> Vec<String> {
    let mut lines = Vec::new();
    lines.push(format!("Number: {}", input.letter_no));
    lines.push(format!("Date: {}", input.date));
    lines.push("To the Parent/Guardian of".to_string());
    lines.push(input.student_name.to_string());
    lines.push("Dear Sir or Madam,".to_string());
    lines.push(format!(
        "This letter is to inform you that {} (student ID {}) has been \
         recorded committing violations of the school code of conduct.",
        input.student_name, input.external_id
    ));
    lines.push("Recorded violations:".to_string());
    for (i, v) in input.violations.iter().enumerate() {
        lines.push(format!("{}. {} ({} points)", i + 1, v.name, v.points));
    }
    lines.push(format!(
        "Accumulated point total: {} points",
        input.point_total
    ));
    lines.push(consequence_paragraph(input.tier).to_string());
    lines.push(
        "We thank you for your attention and cooperation in this matter.".to_string(),
    );
    lines
}

const MARGIN: f64 = 57.0;
const BODY_WIDTH_CHARS: usize = 92;

/// Render the full warning letter as a single-page PDF.
pub fn render_letter_pdf(input: &LetterInput) -> Vec<u8> {
    let mut doc = PdfBuilder::new();
    let right = crate::pdf::PAGE_WIDTH - MARGIN;
    let mut y = crate::pdf::PAGE_HEIGHT - 60.0;

    doc.text_centered(y, 14.0, true, "STUDENT DISCIPLINARY OFFICE");
    y -= 20.0;
    doc.text_centered(y, 12.0, true, "WARNING LETTER");
    y -= 12.0;
    doc.hline(MARGIN, right, y, 0.5);

    y -= 22.0;
    doc.text(MARGIN, y, 10.0, false, &format!("Number: {}", input.letter_no));
    y -= 14.0;
    doc.text(MARGIN, y, 10.0, false, &format!("Date: {}", input.date));

    y -= 26.0;
    doc.text(MARGIN, y, 11.0, false, "To the Parent/Guardian of");
    y -= 14.0;
    doc.text(MARGIN, y, 11.0, true, input.student_name);

    y -= 26.0;
    doc.text(MARGIN, y, 11.0, false, "Dear Sir or Madam,");

    y -= 20.0;
    let narrative = format!(
        "This letter is to inform you that {} (student ID {}) has been recorded \
         committing violations of the school code of conduct.",
        input.student_name, input.external_id
    );
    for line in wrap_text(&narrative, BODY_WIDTH_CHARS) {
        doc.text(MARGIN, y, 10.0, false, &line);
        y -= 13.0;
    }

    y -= 8.0;
    doc.text(MARGIN, y, 10.0, true, "Recorded violations:");
    for (i, v) in input.violations.iter().enumerate() {
        y -= 13.0;
        doc.text(
            MARGIN + 14.0,
            y,
            10.0,
            false,
            &format!("{}. {} ({} points)", i + 1, v.name, v.points),
        );
    }

    y -= 22.0;
    doc.text(
        MARGIN,
        y,
        10.0,
        true,
        &format!("Accumulated point total: {} points", input.point_total),
    );

    y -= 22.0;
    for line in wrap_text(consequence_paragraph(input.tier), BODY_WIDTH_CHARS) {
        doc.text(MARGIN, y, 10.0, false, &line);
        y -= 13.0;
    }

    y -= 9.0;
    doc.text(
        MARGIN,
        y,
        10.0,
        false,
        "We thank you for your attention and cooperation in this matter.",
    );

    y -= 40.0;
    doc.text(right - 140.0, y, 10.0, false, "Respectfully,");
    y -= 50.0;
    doc.text(right - 160.0, y, 10.0, false, "_____________________");
    y -= 14.0;
    doc.text(right - 150.0, y, 10.0, false, "Head of School");

    doc.finish()
}

fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.len() + 1 + word.len() > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_matches_thresholds() {
        assert_eq!(classify(0), None);
        assert_eq!(classify(1), Some(Tier::Tier1));
        assert_eq!(classify(49), Some(Tier::Tier1));
        assert_eq!(classify(50), Some(Tier::Tier2));
        assert_eq!(classify(99), Some(Tier::Tier2));
        assert_eq!(classify(100), Some(Tier::Tier3));
        assert_eq!(classify(250), Some(Tier::Tier3));
    }

    #[test]
    fn letter_no_is_zero_padded() {
        assert_eq!(format_letter_no(Tier::Tier2, 2026, 7), "SP2/2026/0007");
        assert_eq!(format_letter_no(Tier::Tier3, 2025, 1234), "SP3/2025/1234");
    }

    #[test]
    fn tier_codes_roundtrip() {
        for t in [Tier::Tier1, Tier::Tier2, Tier::Tier3] {
            assert_eq!(Tier::from_code(t.code()), Some(t));
        }
        assert_eq!(Tier::from_code("SP4"), None);
    }

    #[test]
    fn letter_lines_name_total_and_violations() {
        let violations = vec![
            RecentViolation {
                name: "Skipping class".to_string(),
                points: 20,
            },
            RecentViolation {
                name: "Curfew breach".to_string(),
                points: 100,
            },
        ];
        let input = LetterInput {
            student_name: "Aisha Rahman",
            external_id: "S-0042",
            tier: Tier::Tier3,
            point_total: 120,
            letter_no: "SP3/2026/0001",
            date: "2026-08-25",
            violations: &violations,
        };
        let text = letter_lines(&input).join("\n");
        assert!(text.contains("Aisha Rahman"));
        assert!(text.contains("120"));
        assert!(text.contains("1. Skipping class (20 points)"));
        assert!(text.contains("2. Curfew breach (100 points)"));
        assert!(text.contains("third warning"));
    }

    #[test]
    fn wrap_respects_width() {
        let wrapped = wrap_text("one two three four five six seven", 12);
        assert!(wrapped.len() > 1);
        for line in &wrapped {
            assert!(line.len() <= 12, "line too long: {:?}", line);
        }
    }

    #[test]
    fn pdf_render_embeds_visible_text() {
        let input = LetterInput {
            student_name: "Aisha Rahman",
            external_id: "S-0042",
            tier: Tier::Tier3,
            point_total: 120,
            letter_no: "SP3/2026/0001",
            date: "2026-08-25",
            violations: &[],
        };
        let bytes = render_letter_pdf(&input);
        let text = String::from_utf8_lossy(&bytes).to_string();
        assert!(text.contains("Aisha Rahman"));
        assert!(text.contains("120 points"));
        assert!(text.contains("WARNING LETTER"));
    }
}
