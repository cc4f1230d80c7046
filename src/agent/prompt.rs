use crate::types::{AiFriend, ProfileFields, SessionDescription};

/// Framing that only the General-mode prompt uses.
pub const GROUP_CHAT_FRAMING: &str = "one of the friends in a group chat";

const TONE: &str = "Keep your reply short, one or two sentences. \
Talk casually, the way friends text each other. \
Never start with your name, a label or a signature. \
Build on what was already said instead of repeating it.";

/// How many long-term memory lines make it into a prompt.
const MEMORY_LINES: usize = 10;

/// Everything a system prompt is built from.
pub struct PromptContext<'a> {
    pub friend: &'a AiFriend,
    pub user: &'a ProfileFields,
    pub friends_summary: &'a str,
    pub description: &'a SessionDescription,
    pub context: &'a [String],
    pub web_content: Option<&'a str>,
}

/// Build the mode-specific system prompt for one responding friend.
pub fn system_prompt(ctx: &PromptContext<'_>) -> String {
    let mut sections = match ctx.description {
        SessionDescription::General { description } => general(ctx, description),
        SessionDescription::StoryMode {
            story,
            characters,
            relationships,
        } => {
            let mut out = vec![
                format!(
                    "You are playing {}, a character in an ongoing story written together with {}. \
                     Stay in character and keep the story moving.",
                    ctx.friend.name, ctx.user.name
                ),
                format!("The story so far: {}", or_none(story)),
            ];
            if !characters.is_empty() {
                let lines: Vec<String> = characters
                    .iter()
                    .map(|c| format!("- {}: {}", c.name, or_none(&c.description)))
                    .collect();
                out.push(format!("Characters:\n{}", lines.join("\n")));
            }
            if !relationships.is_empty() {
                out.push(format!("Relationships:\n- {}", relationships.join("\n- ")));
            }
            out.push(format!("Other characters: {}", ctx.friends_summary));
            out.push(profile_block("Your character", &ctx.friend.profile()));
            out.extend(memory_block(ctx.friend));
            out
        }
        SessionDescription::ResearchCreateMode {
            project_description,
            team_members,
        } => {
            let mut out = vec![
                format!(
                    "You are {}, a researcher working with {} on a shared project.",
                    ctx.friend.name, ctx.user.name
                ),
                format!("Project: {}", or_none(project_description)),
            ];
            if !team_members.is_empty() {
                out.push(format!("Team: {}", team_members.join(", ")));
            }
            out.push(profile_block("Your expertise", &ctx.friend.profile()));
            out.push(
                "Collaborate: offer concrete ideas, stay concise, and ask a clarifying \
                 question whenever the request is ambiguous."
                    .to_string(),
            );
            out
        }
    };

    if !ctx.context.is_empty() {
        sections.push(format!("Recent messages:\n{}", ctx.context.join("\n")));
    }
    if let Some(web) = ctx.web_content {
        sections.push(format!("Reference material from the web:\n{web}"));
    }
    sections.push(TONE.to_string());
    sections.join("\n\n")
}

fn general(ctx: &PromptContext<'_>, description: &str) -> Vec<String> {
    let mut out = vec![
        format!(
            "You are {}, {GROUP_CHAT_FRAMING} with {}.",
            ctx.friend.name, ctx.user.name
        ),
        profile_block("About you", &ctx.friend.profile()),
        profile_block(&format!("About {}", ctx.user.name), ctx.user),
        format!("The friends in this chat: {}", ctx.friends_summary),
        format!("What this chat is about: {description}"),
    ];
    out.extend(memory_block(ctx.friend));
    out
}

fn profile_block(title: &str, profile: &ProfileFields) -> String {
    let mut lines = vec![format!("{title}:"), format!("- name: {}", profile.name)];
    for (label, value) in [
        ("persona", &profile.persona),
        ("about", &profile.about),
        ("knowledge", &profile.knowledge_base),
    ] {
        if !value.trim().is_empty() {
            lines.push(format!("- {label}: {}", value.trim()));
        }
    }
    lines.join("\n")
}

fn memory_block(friend: &AiFriend) -> Option<String> {
    if friend.memory.is_empty() {
        return None;
    }
    let skip = friend.memory.len().saturating_sub(MEMORY_LINES);
    let lines: Vec<String> = friend
        .memory
        .iter()
        .skip(skip)
        .map(|m| format!("- ({}) {}", m.role, m.content))
        .collect();
    Some(format!("Things you remember:\n{}", lines.join("\n")))
}

fn or_none(value: &str) -> &str {
    if value.trim().is_empty() {
        "(not described)"
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MemoryEntry, StoryCharacter};

    fn friend() -> AiFriend {
        AiFriend {
            id: "f1".into(),
            user_id: "u1".into(),
            name: "Mira".into(),
            persona: "curious botanist".into(),
            about: String::new(),
            knowledge_base: "plants".into(),
            status: true,
            memory: (0..12)
                .map(|i| MemoryEntry {
                    role: "assistant".into(),
                    content: format!("memory {i}"),
                })
                .collect(),
            avatar_url: None,
        }
    }

    fn user() -> ProfileFields {
        ProfileFields {
            name: "Sam".into(),
            persona: String::new(),
            about: "likes hiking".into(),
            knowledge_base: String::new(),
        }
    }

    #[test]
    fn general_prompt_keeps_last_memories_and_context() {
        let f = friend();
        let u = user();
        let description = SessionDescription::General {
            description: "weekend plans".into(),
        };
        let context = vec!["Sam: hi".to_string()];
        let prompt = system_prompt(&PromptContext {
            friend: &f,
            user: &u,
            friends_summary: "Mira and Leo",
            description: &description,
            context: &context,
            web_content: None,
        });
        assert!(prompt.contains(GROUP_CHAT_FRAMING));
        assert!(prompt.contains("weekend plans"));
        assert!(prompt.contains("Sam: hi"));
        assert!(prompt.contains("memory 11"));
        assert!(!prompt.contains("memory 1\n"));
        assert!(!prompt.contains("- (assistant) memory 0"));
        assert!(!prompt.contains("- about:"));
    }

    #[test]
    fn story_prompt_lists_characters() {
        let f = friend();
        let u = user();
        let description = SessionDescription::StoryMode {
            story: "a lighthouse mystery".into(),
            characters: vec![StoryCharacter {
                name: "Keeper".into(),
                description: "old and secretive".into(),
            }],
            relationships: vec!["Keeper distrusts Mira".into()],
        };
        let prompt = system_prompt(&PromptContext {
            friend: &f,
            user: &u,
            friends_summary: "summary",
            description: &description,
            context: &[],
            web_content: Some("tide tables"),
        });
        assert!(prompt.contains("- Keeper: old and secretive"));
        assert!(prompt.contains("Keeper distrusts Mira"));
        assert!(prompt.contains("tide tables"));
        assert!(!prompt.contains("Recent messages"));
    }
}
