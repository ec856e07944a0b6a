use brief_core::conversation::{ConversationTurn, Domain};

/// Fixed closing instruction naming the five brief sections. The section
/// set is part of the product contract; every domain template shares it.
const SECTION_FORMAT: &str = "\
Write the brief in exactly these five sections, in this order, each as a markdown heading:
## Core Goal
## Key Context
## Target Audience
## Requirements
## Success Criteria";

/// Domain-specific framing for the synthesis instruction.
fn domain_instruction(domain: Domain) -> &'static str {
    match domain {
        Domain::Business => {
            "You are synthesizing a business brief from an idea-development conversation. \
             Focus on the value proposition, the market being addressed, and commercial viability."
        }
        Domain::Product => {
            "You are synthesizing a product brief from an idea-development conversation. \
             Focus on the user problem, the proposed solution, and what a first version must do."
        }
        Domain::Creative => {
            "You are synthesizing a creative brief from an idea-development conversation. \
             Focus on the concept, its tone and style, and the audience it is meant to move."
        }
        Domain::Research => {
            "You are synthesizing a research brief from an idea-development conversation. \
             Focus on the question being investigated, prior context, and how findings will be judged."
        }
        Domain::Technical => {
            "You are synthesizing a technical brief from an idea-development conversation. \
             Focus on the system being built, its constraints, and the criteria for a sound design."
        }
    }
}

/// Render the full model prompt for a validated conversation.
///
/// Pure function: the entire ordered history is interpolated losslessly,
/// one `User:`/`Assistant:` line per turn. Token-budget truncation, if it
/// is ever needed, belongs at the gateway boundary — never here.
pub fn build(domain: Domain, turns: &[ConversationTurn]) -> String {
    let mut prompt = String::with_capacity(512 + turns.iter().map(|t| t.content.len() + 16).sum::<usize>());

    prompt.push_str(domain_instruction(domain));
    prompt.push_str("\n\nConversation:\n");

    if turns.is_empty() {
        prompt.push_str(
            "(no conversation took place; produce a minimal, clearly low-confidence brief)\n",
        );
    } else {
        for turn in turns {
            prompt.push_str(turn.role.label());
            prompt.push_str(": ");
            prompt.push_str(&turn.content);
            prompt.push('\n');
        }
    }

    prompt.push('\n');
    prompt.push_str(SECTION_FORMAT);
    prompt
}
