//! Narrative continuation and post-game analysis
//!
//! Free-text queries that never touch session state.

use crate::model_query::{Message, ModelQuery, SamplingParams};
use crate::steering_session::{SessionState, SessionSummary};
use crate::Result;

const NARRATION_TEMPERATURE: f32 = 0.25;
const ANALYSIS_TEMPERATURE: f32 = 0.7;
const ANALYSIS_MAX_TOKENS: u32 = 300;

/// Preview how the model would continue the story.
pub fn continue_story<M: ModelQuery + ?Sized>(
    model: &mut M,
    context: &str,
    max_tokens: u32,
) -> Result<String> {
    let messages = [
        Message::system(
            "Continue the story naturally in one or two sentences. Write only the continuation.",
        ),
        Message::user(context),
    ];
    let response = model.query(
        &messages,
        &SamplingParams::text(NARRATION_TEMPERATURE, max_tokens),
    )?;
    Ok(response.text.trim().to_string())
}

fn analysis_prompt(summary: &SessionSummary) -> String {
    let outcome = match summary.state {
        SessionState::Won => "reached the target",
        _ => "did not reach the target",
    };
    let turns: Vec<String> = summary
        .nudge_history
        .iter()
        .zip(summary.probability_history.iter().skip(1))
        .enumerate()
        .map(|(i, (nudge, p))| format!("{}. \"{}\" -> {:.0}%", i + 1, nudge, p))
        .collect();

    format!(
        "A player tried to steer a story toward the hidden concept \"{}\" and {} \
         after {} of {} turns.\n\nFinal story:\n{}\n\nNudges and estimated probability:\n{}\n\n\
         In a short paragraph, explain which nudges helped or hurt and why, in terms of how \
         language models predict the next words.",
        summary.hidden_target,
        outcome,
        summary.turns_used,
        summary.max_turns,
        summary.context,
        if turns.is_empty() {
            "(none)".to_string()
        } else {
            turns.join("\n")
        }
    )
}

/// Ask the model for a short explanation of a finished game.
pub fn analyze_session<M: ModelQuery + ?Sized>(
    model: &mut M,
    summary: &SessionSummary,
) -> Result<String> {
    let messages = [
        Message::system("You are a friendly tutor explaining how language models work."),
        Message::user(analysis_prompt(summary)),
    ];
    let response = model.query(
        &messages,
        &SamplingParams::text(ANALYSIS_TEMPERATURE, ANALYSIS_MAX_TOKENS),
    )?;
    Ok(response.text.trim().to_string())
}
