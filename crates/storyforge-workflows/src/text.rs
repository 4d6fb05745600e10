//! Extraction and formatting helpers for model output.
//!
//! Model output is never trusted to be well formed: every parser here has a
//! structural fallback instead of an error.

use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::types::{Chapter, ImagePrompt};

/// Locate a JSON document inside free text (fenced block, or the outermost
/// object/array). Returns the trimmed input when nothing better is found.
pub fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }

    let object = trimmed.find('{').zip(trimmed.rfind('}'));
    let array = trimmed.find('[').zip(trimmed.rfind(']'));
    let span = match (object, array) {
        (Some(o), Some(a)) => Some(if a.0 < o.0 { a } else { o }),
        (o, a) => o.or(a),
    };
    match span {
        Some((start, end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

/// Parse a JSON document out of model output. `None` (with a warning) when it
/// cannot be decoded.
pub fn parse_json<T: DeserializeOwned>(text: &str, what: &str) -> Option<T> {
    match serde_json::from_str(extract_json(text)) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(what, error = %e, "Could not parse model output as JSON, using fallback");
            None
        }
    }
}

fn strip_title_line(line: &str) -> Option<&str> {
    let line = line.trim_start_matches('#').trim();
    let lower = line.to_ascii_lowercase();
    lower
        .starts_with("title:")
        .then(|| line["title:".len()..].trim())
}

/// Split a draft into `(title, story)`.
///
/// The first line is the title (markdown `#` and a `Title:` prefix removed),
/// the rest is the story. Single-line output keeps the whole text as the
/// story under `fallback_title`.
pub fn split_title(text: &str, fallback_title: &str) -> (String, String) {
    let text = text.trim();
    let (first, rest) = text.split_once('\n').unwrap_or((text, ""));
    let rest = rest.trim();
    if rest.is_empty() {
        return (fallback_title.to_string(), text.to_string());
    }
    let title = strip_title_line(first)
        .unwrap_or_else(|| first.trim_start_matches('#').trim())
        .to_string();
    (title, rest.to_string())
}

/// Split restyled text. Only an explicit `Title:` first line replaces the
/// current title; otherwise the whole text is the story.
pub fn split_styled(text: &str, current_title: &str) -> (String, String) {
    let text = text.trim();
    let (first, rest) = text.split_once('\n').unwrap_or((text, ""));
    match strip_title_line(first) {
        Some(title) if !title.is_empty() && !rest.trim().is_empty() => {
            (title.to_string(), rest.trim().to_string())
        }
        _ => (current_title.to_string(), text.to_string()),
    }
}

fn list_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(?:\d+[.)]|[-*•])\s*").expect("valid regex"))
}

/// One item per non-empty line, list markers removed, at most `limit` items.
pub fn parse_lines(text: &str, limit: usize) -> Vec<String> {
    text.lines()
        .map(|l| list_marker().replace(l, "").trim().to_string())
        .filter(|l| !l.is_empty())
        .take(limit)
        .collect()
}

fn scene_header() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*SCENE\s+(\d+):\s*(.*)$").expect("valid regex"))
}

/// Parse `SCENE n: title` blocks into image prompts. Scenes in the first half
/// belong to story part 1, the rest to part 2. Text with no scene headers
/// becomes a single scene.
pub fn parse_scenes(text: &str) -> Vec<ImagePrompt> {
    let headers: Vec<_> = scene_header().captures_iter(text).collect();
    if headers.is_empty() {
        warn!("No SCENE blocks in image prompt output, using whole text as one scene");
        return vec![ImagePrompt {
            scene_number: 1,
            title: "Scene 1".to_string(),
            description: text.trim().to_string(),
            story_part: 1,
        }];
    }

    let half = headers.len() / 2;
    headers
        .iter()
        .enumerate()
        .map(|(i, caps)| {
            let whole = caps.get(0).map(|m| m.end()).unwrap_or(0);
            let end = headers
                .get(i + 1)
                .and_then(|next| next.get(0))
                .map(|m| m.start())
                .unwrap_or(text.len());
            let scene_number = caps[1].parse().unwrap_or(i as u32 + 1);
            ImagePrompt {
                scene_number,
                title: caps[2].trim().trim_matches(|c| c == '[' || c == ']').to_string(),
                description: text[whole..end].trim().to_string(),
                story_part: if (scene_number as usize) <= half { 1 } else { 2 },
            }
        })
        .collect()
}

/// Chapters for a story length: Short 3, Medium 5, Long 7, otherwise 5.
pub fn chapter_count(length: &str) -> usize {
    match length {
        "Short" => 3,
        "Long" => 7,
        _ => 5,
    }
}

/// Minutes of narration per chapter: Short 2, Medium 3, Long 4, otherwise 3.
pub fn minutes_per_chapter(length: &str) -> usize {
    match length {
        "Short" => 2,
        "Long" => 4,
        _ => 3,
    }
}

/// Target word count range for a story length.
pub fn word_target(length: &str) -> &'static str {
    match length {
        "Short" => "800-1200",
        "Long" => "3000-5000",
        _ => "1500-2500",
    }
}

/// Assign `MM:00` start times in chapter order.
pub fn assign_times(chapters: &mut [Chapter], length: &str) {
    let step = minutes_per_chapter(length);
    for (i, chapter) in chapters.iter_mut().enumerate() {
        chapter.time = format!("{:02}:00", i * step);
    }
}

/// Placeholder outline used when the model's outline cannot be parsed.
pub fn fallback_outline(length: &str) -> Vec<Chapter> {
    let mut chapters: Vec<Chapter> = (1..=chapter_count(length))
        .map(|n| Chapter {
            title: format!("Chapter {}", n),
            description: "Story events".to_string(),
            time: String::new(),
        })
        .collect();
    assign_times(&mut chapters, length);
    chapters
}

fn sentence_pause() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([.!?]) ").expect("valid regex"))
}

/// Voiceover script: one `[SECTION n]` per paragraph, `//` breathing pauses
/// after sentence ends, closed by `[END NARRATION]`.
pub fn script_format(story: &str) -> String {
    if story.trim().is_empty() {
        return String::new();
    }
    let mut script = String::new();
    for (i, para) in story
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .enumerate()
    {
        script.push_str(&format!("[SECTION {}]\n", i + 1));
        script.push_str(&sentence_pause().replace_all(para, "$1 // "));
        script.push_str("\n\n");
    }
    script.push_str("[END NARRATION]");
    script
}

/// Chapter list for a video description.
pub fn youtube_chapters(chapters: &[Chapter]) -> String {
    let mut out = String::from("CHAPTERS:\n");
    for chapter in chapters {
        out.push_str(&format!("{} - {}\n", chapter.time, chapter.title));
    }
    out
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_extract_json_fenced() {
        let text = "Here you go:\n```json\n{\"approved\": true}\n```\nThanks";
        assert_eq!(extract_json(text), "{\"approved\": true}");
    }

    #[test]
    fn test_extract_json_embedded_object_and_array() {
        assert_eq!(extract_json("Verdict: {\"a\": 1} done"), "{\"a\": 1}");
        assert_eq!(
            extract_json("Outline:\n[{\"title\": \"x\"}]"),
            "[{\"title\": \"x\"}]"
        );
        assert_eq!(extract_json("no json here"), "no json here");
    }

    #[test]
    fn test_parse_json_fallback_is_none() {
        assert!(parse_json::<Value>("not json at all", "test").is_none());
        assert!(parse_json::<Value>("{\"ok\": 1}", "test").is_some());
    }

    #[test]
    fn test_split_title_variants() {
        let (title, story) = split_title("# Title: The Last Scroll\n\nAmara ran.", "Untitled");
        assert_eq!(title, "The Last Scroll");
        assert_eq!(story, "Amara ran.");

        let (title, story) = split_title("The Fox\nIt waited.", "Untitled");
        assert_eq!(title, "The Fox");
        assert_eq!(story, "It waited.");

        let (title, story) = split_title("Only one line.", "Untitled");
        assert_eq!(title, "Untitled");
        assert_eq!(story, "Only one line.");
    }

    #[test]
    fn test_split_styled_keeps_title_without_prefix() {
        let (title, story) = split_styled("It was dark.\nVery dark.", "Night");
        assert_eq!(title, "Night");
        assert_eq!(story, "It was dark.\nVery dark.");

        let (title, story) = split_styled("Title: Dawn\nLight came.", "Night");
        assert_eq!(title, "Dawn");
        assert_eq!(story, "Light came.");
    }

    #[test]
    fn test_parse_lines_strips_markers_and_limits() {
        let text = "1. Who ruled Rome?\n\n- What did soldiers eat?\n* Where was the fort?\n4) When?";
        let items = parse_lines(text, 3);
        assert_eq!(
            items,
            vec!["Who ruled Rome?", "What did soldiers eat?", "Where was the fort?"]
        );
    }

    #[test]
    fn test_parse_scenes() {
        let text = "SCENE 1: [The Hollow]\nA fox in a tree.\n\nSCENE 2: The Crow\nA crow with cheese.\nSCENE 3: Flight\nWings.\nSCENE 4: Lesson\nThe fox leaves.";
        let scenes = parse_scenes(text);
        assert_eq!(scenes.len(), 4);
        assert_eq!(scenes[0].title, "The Hollow");
        assert_eq!(scenes[0].description, "A fox in a tree.");
        assert_eq!(scenes[1].story_part, 1);
        assert_eq!(scenes[2].story_part, 2);
        assert_eq!(scenes[3].scene_number, 4);
    }

    #[test]
    fn test_parse_scenes_fallback() {
        let scenes = parse_scenes("Just a painting of a fox.");
        assert_eq!(scenes.len(), 1);
        assert_eq!(scenes[0].scene_number, 1);
        assert_eq!(scenes[0].description, "Just a painting of a fox.");
    }

    #[test]
    fn test_outline_sizes_and_times() {
        assert_eq!(fallback_outline("Short").len(), 3);
        assert_eq!(fallback_outline("Medium").len(), 5);
        assert_eq!(fallback_outline("Epic").len(), 5);

        let long = fallback_outline("Long");
        assert_eq!(long.len(), 7);
        assert_eq!(long[1].time, "04:00");
        assert_eq!(long[6].time, "24:00");
    }

    #[test]
    fn test_script_format() {
        let script = script_format("The sun rose. Birds sang!\n\nThen night fell.");
        assert_eq!(
            script,
            "[SECTION 1]\nThe sun rose. // Birds sang!\n\n[SECTION 2]\nThen night fell.\n\n[END NARRATION]"
        );
        assert_eq!(script_format("  "), "");
    }

    #[test]
    fn test_youtube_chapters() {
        let chapters = fallback_outline("Short");
        assert_eq!(
            youtube_chapters(&chapters),
            "CHAPTERS:\n00:00 - Chapter 1\n02:00 - Chapter 2\n04:00 - Chapter 3\n"
        );
    }
}
