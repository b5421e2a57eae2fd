//! Prompt templates and fixed instructor lines.
//!
//! The built-in prompts are compiled from `prompts/*.md`. A directory of
//! Markdown files can override any of them; the file stem is the key.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

/// Spoken when the opening cannot be generated.
pub const DEFAULT_OPENING: &str = "大家好！欢迎参加《企业出海》培训课程。让我们从中能科技的案例开始，请问您认为企业在制定出海战略时，首先应该考虑哪些因素？";
/// Spoken in place of a reply the generation service failed to produce.
pub const GENERATION_FALLBACK: &str = "让我们继续深入讨论这个重要话题。请分享您的具体想法。";
/// Closing appended to a generated summary.
pub const SUMMARY_CLOSING: &str = "感谢大家参与今天的《企业出海》培训课程！";
/// Spoken in place of a summary the generation service failed to produce.
pub const SUMMARY_FALLBACK: &str = "通过今天的深入交流，我看到了大家对企业出海战略的深入思考。希望大家能够将今天学到的知识应用到实际工作中。感谢参与！";
/// Spoken on a manual end command before the connection closes.
pub const FAREWELL: &str = "好的，培训会话即将结束。感谢您的参与！再见！";
/// Spoken when the remote model never acknowledged its role.
pub const FORCED_START: &str = "现在开始《企业出海》培训课程。我们将通过中能科技进军欧洲市场的案例来学习企业出海战略。请问，您认为中能科技在决定出海时，首先分析了哪些关键因素？";
/// Spoken once the remote model acknowledged its role.
pub const FIRST_QUESTION: &str = "很好！现在让我们开始《企业出海》课程的学习。基于中能科技的案例，请您分析一下：企业在制定出海战略时，应该首先考虑哪些内外部因素？";
/// Role instruction used when one cannot be generated.
pub const ROLE_INIT_FALLBACK: &str = "你现在要扮演一位资深企业培训师，负责《企业出海》培训课程。你的任务是基于中能科技进军欧洲的案例，与学员进行6轮互动问答，引导他们学习企业如何制定出海战略。请用培训师的专业语气回复，每次150字左右。请回复\"明白了，我现在是企业培训师，负责《企业出海》课程培训\"确认你的角色。";

/// The prompt texts used to drive the generation service.
#[derive(Debug, Clone)]
pub struct PromptSet {
    pub system: String,
    pub opening: String,
    pub turn: String,
    pub summary: String,
    pub role_init: String,
    pub role_init_system: String,
    pub forward_summary: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            system: include_str!("../prompts/system_prompt.md").trim().to_string(),
            opening: include_str!("../prompts/opening.md").trim().to_string(),
            turn: include_str!("../prompts/turn.md").trim().to_string(),
            summary: include_str!("../prompts/summary.md").trim().to_string(),
            role_init: include_str!("../prompts/role_init.md").trim().to_string(),
            role_init_system: include_str!("../prompts/role_init_system.md")
                .trim()
                .to_string(),
            forward_summary: include_str!("../prompts/forward_summary.md")
                .trim()
                .to_string(),
        }
    }
}

/// Reads every `*.md` file in `dir` into a map keyed by file stem.
fn load_prompts(dir: &Path) -> Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Could not read prompts directory {}", dir.display()))?
    {
        let path = entry?.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem")?
                .to_string();
            let content = std::fs::read_to_string(&path)?;
            prompts.insert(key, content.trim().to_string());
        }
    }
    Ok(prompts)
}

impl PromptSet {
    /// Built-in prompts, overridden by any matching file in `dir`.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let mut prompts = load_prompts(dir)?;
        let mut set = Self::default();
        for (key, slot) in [
            ("system_prompt", &mut set.system),
            ("opening", &mut set.opening),
            ("turn", &mut set.turn),
            ("summary", &mut set.summary),
            ("role_init", &mut set.role_init),
            ("role_init_system", &mut set.role_init_system),
            ("forward_summary", &mut set.forward_summary),
        ] {
            if let Some(text) = prompts.remove(key) {
                debug!(prompt = key, "Prompt overridden from directory");
                *slot = text;
            }
        }
        for key in prompts.keys() {
            warn!(prompt = %key, "Ignoring unknown prompt file");
        }
        Ok(set)
    }

    /// The phase-aware instruction appended after the history for one reply.
    pub fn turn_instruction(
        &self,
        round: u32,
        max_rounds: u32,
        user_input: &str,
        length_limit: u32,
    ) -> String {
        self.turn
            .replace("{round}", &round.to_string())
            .replace("{max_rounds}", &max_rounds.to_string())
            .replace("{last_middle_round}", &max_rounds.saturating_sub(1).to_string())
            .replace("{length_limit}", &length_limit.to_string())
            .replace("{user_input}", user_input)
    }

    pub fn summary_instruction(&self, max_rounds: u32) -> String {
        self.summary.replace("{max_rounds}", &max_rounds.to_string())
    }

    pub fn role_init_request(&self, max_rounds: u32) -> String {
        self.role_init.replace("{max_rounds}", &max_rounds.to_string())
    }

    /// The summary request spoken to the remote model in forward mode.
    pub fn forward_summary_request(&self, max_rounds: u32) -> String {
        self.forward_summary
            .replace("{max_rounds}", &max_rounds.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_defaults_are_loaded() {
        let prompts = PromptSet::default();
        assert!(prompts.system.contains("中能科技"));
        assert!(prompts.turn.contains("{round}"));
        assert!(!prompts.forward_summary.ends_with('\n'));
    }

    #[test]
    fn test_turn_instruction_fills_placeholders() {
        let prompts = PromptSet::default();
        let text = prompts.turn_instruction(3, 6, "先看市场", 180);
        assert!(text.contains("当前是第3轮对话（总共6轮）"));
        assert!(text.contains("中间轮次（2-5轮）"));
        assert!(text.contains("学员刚才说: \"先看市场\""));
        assert!(text.contains("180字以内"));
        assert!(!text.contains('{'));
    }

    #[test]
    fn test_user_input_braces_are_not_expanded() {
        let prompts = PromptSet::default();
        let text = prompts.turn_instruction(1, 2, "{round}", 100);
        assert!(text.contains("学员刚才说: \"{round}\""));
    }

    #[test]
    fn test_forward_summary_request() {
        let text = PromptSet::default().forward_summary_request(2);
        assert!(text.starts_with("请作为培训讲师对学员在2轮"));
    }

    #[test]
    fn test_from_dir_overrides_known_keys() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("system_prompt.md"), "You are a coach.\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        fs::write(dir.path().join("unknown.md"), "ignored too").unwrap();

        let prompts = PromptSet::from_dir(dir.path()).unwrap();
        assert_eq!(prompts.system, "You are a coach.");
        assert_eq!(prompts.opening, PromptSet::default().opening);
    }

    #[test]
    fn test_from_dir_missing_directory() {
        let result = PromptSet::from_dir(Path::new("/definitely/not/here"));
        assert!(result.is_err());
    }
}
