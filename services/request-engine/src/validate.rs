//! Intake answer validation.
//!
//! Runs before any credits move: every required question must carry a
//! usable answer, and selections may only use options the question offers.

use types::errors::RequestError;
use types::service::{Answer, AttributeResponse, QuestionKind, QuestionSpec};

/// Validate a client's answers against a service's intake questions.
///
/// Returns the first failure, in question order.
pub fn validate_responses(
    questions: &[QuestionSpec],
    responses: &[AttributeResponse],
) -> Result<(), RequestError> {
    for question in questions {
        let response = responses.iter().find(|r| r.question == question.prompt);

        let answer = match response {
            Some(r) => &r.answer,
            None if question.required => {
                return Err(RequestError::ValidationFailed {
                    question: question.prompt.clone(),
                    reason: "required question was not answered".to_string(),
                });
            }
            None => continue,
        };

        if question.required && !answer.is_answered() {
            return Err(RequestError::ValidationFailed {
                question: question.prompt.clone(),
                reason: "answer is empty".to_string(),
            });
        }

        check_shape(question, answer)?;
    }
    Ok(())
}

/// A present answer must fit the question it answers, required or not.
fn check_shape(question: &QuestionSpec, answer: &Answer) -> Result<(), RequestError> {
    match (&question.kind, answer) {
        (QuestionKind::Text, Answer::Text(_)) => Ok(()),
        (QuestionKind::MultiSelect { options }, Answer::Selection(chosen)) => {
            for choice in chosen {
                if !options.contains(choice) {
                    return Err(RequestError::ValidationFailed {
                        question: question.prompt.clone(),
                        reason: format!("\"{}\" is not one of the offered options", choice),
                    });
                }
            }
            Ok(())
        }
        _ => Err(RequestError::ValidationFailed {
            question: question.prompt.clone(),
            reason: "answer does not match the question kind".to_string(),
        }),
    }
}
