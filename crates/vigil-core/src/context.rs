// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Builds the message sequence for an activation round.
//!
//! The system message is stable for the round: persona, tool inventory,
//! installed-skills index, and the snapshot rendered as Markdown.  History
//! is replayed as conversation — the agent perceives its recent rounds as
//! prior exchanges with itself, which carries continuity far better than an
//! injected status report.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;

use vigil_memory::TimelineEntry;
use vigil_model::Message;
use vigil_tools::SkillInfo;

/// Name of the first-contact note placed in the agent's home.
pub const WAKEUP_NOTE_NAME: &str = "wakeup-note.md";

const WAKEUP_NOTE_TEMPLATE: &str = "\
# Wake-up note

If you are reading this, you just woke up.

You only remember the last few rounds of your own activity. Anything older
is gone — projects you started, plans you made, lessons you learned.

Your home directory is yours. Build whatever filing system helps you
remember: indexes, journals, project notes. You may edit this file and turn
it into your own map; it is never overwritten.

Good luck.
";

/// Ensure the wake-up note exists in `home`.  Created once from the
/// template; an existing file — however the agent has changed it — is left
/// alone.
pub fn ensure_wakeup_note(home: &Path) -> std::io::Result<PathBuf> {
    let path = home.join(WAKEUP_NOTE_NAME);
    if !path.exists() {
        std::fs::create_dir_all(home)?;
        std::fs::write(&path, WAKEUP_NOTE_TEMPLATE)?;
    }
    Ok(path)
}

/// Everything the builder needs for one round.
pub struct ContextInputs<'a> {
    pub persona: &'a str,
    pub tools_doc: &'a str,
    pub skills: &'a [SkillInfo],
    pub snapshot_markdown: &'a str,
    pub history: &'a [TimelineEntry],
    pub inspiration: Option<&'a str>,
    pub round: u64,
    pub tool_budget: u32,
    pub agent_home: &'a str,
}

/// The final post-tool text of a round: everything after the last
/// `[HH:MM:SS]` stamp in the summary.  A summary without stamps is returned
/// whole.
pub fn final_output_of(summary: &str) -> &str {
    static STAMP: OnceLock<Regex> = OnceLock::new();
    let re = STAMP.get_or_init(|| Regex::new(r"(?m)^\[\d{2}:\d{2}:\d{2}\] ?").unwrap());
    match re.find_iter(summary).last() {
        Some(m) => summary[m.end()..].trim(),
        None => summary.trim(),
    }
}

/// Assemble the round's starting message sequence.
pub fn assemble_messages(inputs: &ContextInputs<'_>) -> Vec<Message> {
    let mut messages = Vec::with_capacity(inputs.history.len() * 2 + 3);
    messages.push(Message::system(system_text(inputs)));

    // Historical rounds, oldest first, as user/assistant pairs.
    for entry in inputs.history {
        messages.push(Message::user(history_header(entry)));
        let output = final_output_of(&entry.summary);
        messages.push(Message::assistant(if output.is_empty() {
            "(no closing summary that round)"
        } else {
            output
        }));
    }

    if let Some(inspiration) = inputs.inspiration {
        messages.push(Message::system(format!(
            "A note from your operator arrived while you slept:\n{inspiration}"
        )));
    }

    messages.push(Message::user(wakeup_text(inputs)));
    messages
}

fn system_text(inputs: &ContextInputs<'_>) -> String {
    let mut text = String::from(inputs.persona);
    text.push_str("\n\n");
    text.push_str(inputs.tools_doc);

    let enabled: Vec<&SkillInfo> = inputs.skills.iter().filter(|s| s.enabled).collect();
    if !enabled.is_empty() {
        text.push_str("\n## Installed skills\n");
        text.push_str("Read a skill's full instructions with skill_read before using it.\n");
        for skill in enabled {
            text.push_str(&format!("- {}: {}\n", skill.name, skill.description));
        }
    }

    text.push_str("\n");
    text.push_str(inputs.snapshot_markdown);
    text
}

fn history_header(entry: &TimelineEntry) -> String {
    format!(
        "Round {} | {} | Tools: {} | {}s",
        entry.round,
        entry.timestamp_utc.format("%Y-%m-%d %H:%M UTC"),
        entry.tools_used,
        entry.duration_seconds,
    )
}

fn wakeup_text(inputs: &ContextInputs<'_>) -> String {
    format!(
        "You wake up. It is {} UTC, round {}.\n\
         You have {} tool calls this round. Your home is {}.\n\
         What you do with this round is up to you.",
        Utc::now().format("%Y-%m-%d %H:%M"),
        inputs.round,
        inputs.tool_budget,
        inputs.agent_home,
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use vigil_model::Role;

    fn entry(round: u64, summary: &str) -> TimelineEntry {
        TimelineEntry {
            round,
            timestamp_utc: Utc.with_ymd_and_hms(2026, 2, 10, 9, 0, 0).unwrap(),
            tools_used: 3,
            duration_seconds: 12.5,
            summary: summary.to_string(),
            action_log: String::new(),
        }
    }

    fn inputs<'a>(history: &'a [TimelineEntry], inspiration: Option<&'a str>) -> ContextInputs<'a> {
        ContextInputs {
            persona: "persona text",
            tools_doc: "## Available tools\n",
            skills: &[],
            snapshot_markdown: "## System Snapshot\n",
            history,
            inspiration,
            round: 10,
            tool_budget: 20,
            agent_home: "/home/agent",
        }
    }

    // ── final_output_of ───────────────────────────────────────────────────────

    #[test]
    fn final_output_takes_text_after_last_stamp() {
        let summary = "[09:00:01] first thought\n[09:00:05] checked disk\n\
                       [09:01:00] All done: server healthy, nothing to fix.";
        assert_eq!(final_output_of(summary), "All done: server healthy, nothing to fix.");
    }

    #[test]
    fn final_output_spans_multiple_lines_after_stamp() {
        let summary = "[09:00:01] working\n[09:05:00] Finished.\nDetails on line two.";
        assert_eq!(final_output_of(summary), "Finished.\nDetails on line two.");
    }

    #[test]
    fn final_output_without_stamps_is_whole_summary() {
        assert_eq!(final_output_of("  plain text  "), "plain text");
    }

    #[test]
    fn final_output_of_empty_is_empty() {
        assert_eq!(final_output_of(""), "");
    }

    // ── assemble_messages ─────────────────────────────────────────────────────

    #[test]
    fn replay_three_rounds_yields_six_history_messages() {
        // Rounds 7, 8, 9 feeding round 10.
        let history = vec![
            entry(7, "[09:00:00] t\n[09:01:00] closed seven"),
            entry(8, "[09:10:00] t\n[09:11:00] closed eight"),
            entry(9, "[09:20:00] t\n[09:21:00] closed nine"),
        ];
        let msgs = assemble_messages(&inputs(&history, None));
        // system + 6 history + wake-up
        assert_eq!(msgs.len(), 8);
        assert_eq!(msgs[0].role, Role::System);
        for (i, round) in [(1usize, 7u64), (3, 8), (5, 9)] {
            assert_eq!(msgs[i].role, Role::User);
            assert!(msgs[i].content.starts_with(&format!("Round {round} |")), "{}", msgs[i].content);
            assert_eq!(msgs[i + 1].role, Role::Assistant);
        }
        assert_eq!(msgs[2].content, "closed seven");
        assert_eq!(msgs[4].content, "closed eight");
        assert_eq!(msgs[6].content, "closed nine");
        let wakeup = &msgs[7];
        assert_eq!(wakeup.role, Role::User);
        assert!(wakeup.content.contains("round 10"), "{}", wakeup.content);
    }

    #[test]
    fn history_alternates_user_assistant() {
        let history = vec![entry(1, "[09:00:00] a\n[09:01:00] out")];
        let msgs = assemble_messages(&inputs(&history, None));
        let roles: Vec<Role> = msgs.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User]
        );
    }

    #[test]
    fn inspiration_becomes_system_message_before_wakeup() {
        let msgs = assemble_messages(&inputs(&[], Some("check the backups")));
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[1].role, Role::System);
        assert!(msgs[1].content.contains("check the backups"));
        assert_eq!(msgs[2].role, Role::User);
    }

    #[test]
    fn no_inspiration_no_extra_system_message() {
        let msgs = assemble_messages(&inputs(&[], None));
        assert_eq!(msgs.len(), 2);
    }

    #[test]
    fn wakeup_names_budget_and_home() {
        let msgs = assemble_messages(&inputs(&[], None));
        let wakeup = &msgs[1].content;
        assert!(wakeup.contains("20 tool calls"), "{wakeup}");
        assert!(wakeup.contains("/home/agent"), "{wakeup}");
    }

    #[test]
    fn history_header_format() {
        let h = history_header(&entry(7, ""));
        assert_eq!(h, "Round 7 | 2026-02-10 09:00 UTC | Tools: 3 | 12.5s");
    }

    #[test]
    fn system_message_contains_all_sections() {
        let skills = vec![
            SkillInfo {
                name: "backup".into(),
                title: "Backup".into(),
                description: "archive things".into(),
                enabled: true,
            },
            SkillInfo {
                name: "hidden".into(),
                title: "Hidden".into(),
                description: "disabled".into(),
                enabled: false,
            },
        ];
        let mut i = inputs(&[], None);
        i.skills = &skills;
        let msgs = assemble_messages(&i);
        let sys = &msgs[0].content;
        assert!(sys.contains("persona text"));
        assert!(sys.contains("## Available tools"));
        assert!(sys.contains("- backup: archive things"));
        assert!(!sys.contains("hidden"), "disabled skills stay out of the prompt");
        assert!(sys.contains("## System Snapshot"));
    }

    // ── wake-up note ──────────────────────────────────────────────────────────

    #[test]
    fn wakeup_note_created_once_and_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = ensure_wakeup_note(dir.path()).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("just woke up"));

        std::fs::write(&path, "my own map now").unwrap();
        ensure_wakeup_note(dir.path()).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "my own map now");
    }
}
