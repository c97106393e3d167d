//! Markdown reduction for speech synthesis.
//!
//! Assistant replies arrive as markdown meant for rendering; synthesizers
//! need flowing text. This walk keeps the words and turns structure into
//! pauses via `pulldown_cmark`.

use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};

/// Characters that already read as a pause, so block boundaries do not
/// need an inserted period. Includes the Bengali danda.
const PAUSE_CHARS: [char; 7] = ['.', '!', '?', ':', ',', '।', '…'];

/// Reduce assistant markdown to text a synthesizer can speak.
///
/// Headings, emphasis markers and list bullets vanish; block boundaries
/// become sentence pauses; fenced code is dropped entirely (reading code
/// aloud is noise) while inline code keeps its text; links and images
/// reduce to their label text.
pub fn speakable_text(markdown: &str) -> String {
    let options =
        Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TASKLISTS;
    let parser = Parser::new_ext(markdown, options);

    let mut out = String::new();
    let mut in_code_block = false;

    for event in parser {
        match event {
            Event::Start(Tag::CodeBlock(_)) => in_code_block = true,
            Event::End(TagEnd::CodeBlock) => in_code_block = false,
            Event::Text(text) if !in_code_block => out.push_str(&text),
            Event::Code(code) => out.push_str(&code),
            Event::SoftBreak | Event::HardBreak => {
                if !out.ends_with(' ') {
                    out.push(' ');
                }
            }
            Event::End(TagEnd::TableCell) => {
                if !out.ends_with(' ') {
                    out.push(' ');
                }
            }
            Event::End(
                TagEnd::Paragraph | TagEnd::Heading(_) | TagEnd::Item | TagEnd::TableRow,
            )
            | Event::Rule => push_pause(&mut out),
            _ => {}
        }
    }

    out.trim_end().to_owned()
}

/// End the current run with pause punctuation and a space, unless it
/// already pauses.
fn push_pause(out: &mut String) {
    let trimmed_len = out.trim_end().len();
    out.truncate(trimmed_len);
    if trimmed_len == 0 {
        return;
    }
    if !out.ends_with(PAUSE_CHARS) {
        out.push('.');
    }
    out.push(' ');
}
