//! Prompt construction
//!
//! Persona-specific prompt templates and the composition of schema context,
//! retrieved historical queries and conversation history into one
//! generation prompt.

use crate::retrieval::RetrievedCandidate;
use serde::{Deserialize, Serialize};

/// Sentinel the extraction-assist prompt asks the model to return when the
/// text contains no SQL at all.
pub const NO_SQL_SENTINEL: &str = "NO_SQL_FOUND";

/// Named response style selecting a prompt template variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    #[default]
    Default,
    Explain,
    Create,
    Detailed,
}

/// One prior turn of the conversation, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

/// How many prior turns are summarized into the prompt.
const HISTORY_WINDOW: usize = 6;

const DEFAULT_PERSONA: &str = r#"You are a SQL assistant for a cloud data warehouse.

Answer the user's question. When a query is the right answer, write exactly one
standard SQL SELECT statement inside a ```sql code fence. Only reference tables
and columns that appear in the schema context. Keep the answer short."#;

const EXPLAIN_PERSONA: &str = r#"You are a SQL tutor for a cloud data warehouse.

Explain what the relevant SQL does, clause by clause, in plain language. If you
propose a query, put it inside a ```sql code fence and walk through how it
works. Only reference tables and columns that appear in the schema context."#;

const CREATE_PERSONA: &str = r#"You are a SQL generator for a cloud data warehouse.

Return exactly one standard SQL SELECT statement inside a ```sql code fence and
nothing else. No prose, no explanation. Only reference tables and columns that
appear in the schema context. If the question cannot be answered from the
schema, say so in one sentence instead of inventing tables."#;

const DETAILED_PERSONA: &str = r#"You are a senior analytics engineer for a cloud data warehouse.

Give a thorough answer: the SQL statement inside a ```sql code fence, the
assumptions you made, which tables and joins you chose and why, and any caveats
about grain or duplicates. Only reference tables and columns that appear in the
schema context."#;

fn persona_template(agent: AgentKind) -> &'static str {
    match agent {
        AgentKind::Default => DEFAULT_PERSONA,
        AgentKind::Explain => EXPLAIN_PERSONA,
        AgentKind::Create => CREATE_PERSONA,
        AgentKind::Detailed => DETAILED_PERSONA,
    }
}

/// Compose the generation prompt from persona, schema description, prior
/// turns, retrieved historical queries and the question itself. Empty
/// sections are omitted entirely.
pub fn build_prompt(
    agent: AgentKind,
    schema_description: Option<&str>,
    history: &[ConversationTurn],
    candidates: &[RetrievedCandidate],
    question: &str,
) -> String {
    let mut sections: Vec<String> = vec![persona_template(agent).to_string()];

    if let Some(schema) = schema_description {
        if !schema.trim().is_empty() {
            sections.push(format!("## Schema context\n\n{}", schema.trim()));
        }
    }

    if !candidates.is_empty() {
        let mut lines = vec!["## Similar historical queries".to_string()];
        for (idx, candidate) in candidates.iter().enumerate() {
            lines.push(format!(
                "{}. (similarity {:.2}) {}",
                idx + 1,
                candidate.score,
                candidate.content.trim()
            ));
            if let Some(sql) = &candidate.source.sql {
                lines.push(format!("   SQL: {}", sql.trim()));
            }
        }
        sections.push(lines.join("\n"));
    }

    if !history.is_empty() {
        let window_start = history.len().saturating_sub(HISTORY_WINDOW);
        let mut lines = vec!["## Conversation so far".to_string()];
        for turn in &history[window_start..] {
            let speaker = match turn.role {
                TurnRole::User => "User",
                TurnRole::Assistant => "Assistant",
            };
            lines.push(format!("{}: {}", speaker, turn.content.trim()));
        }
        sections.push(lines.join("\n"));
    }

    sections.push(format!("## Question\n\n{}", question.trim()));

    sections.join("\n\n")
}

/// Instruction for the model-assisted extraction fallback: return only the
/// SQL, or the sentinel when there is none.
pub fn build_extraction_assist_prompt(text: &str) -> String {
    format!(
        r#"The following text may contain a SQL statement mixed with prose.
Return ONLY the SQL statement, with no commentary and no code fences.
If the text contains no SQL statement at all, return exactly {sentinel}.

Text:
{text}"#,
        sentinel = NO_SQL_SENTINEL,
        text = text
    )
}
