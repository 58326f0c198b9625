//! Prompt text sent to the completion endpoint.

use docmatrix_llm::Message;

use crate::project::Column;

const ANALYST_ROLE: &str = "You are a meticulous document analyst. Answer only from the supplied \
document. When the document does not contain the answer, say so plainly.";

const SUMMARY_ROLE: &str = "You condense previously extracted answers into short, factual \
summaries. Never introduce facts that are absent from the material you are given.";

const SINGLE_FORMAT: &str = r#"Reply with a single JSON object and nothing else:
{"answer": "<answer text with [1], [2] markers>", "citations": [{"text": "<verbatim quote>"}]}
Every marker [n] refers to the n-th entry of "citations". Quotes must be copied
character for character from the document and be short enough to locate."#;

const ROW_FORMAT: &str = r#"Reply with a single JSON object and nothing else:
{"answers": {"<question id>": {"answer": "<text>", "citations": [{"text": "<verbatim quote>"}]}}}
Use [n] markers inside each answer to refer to its own citations, or inline
markers of the form [[cite:"verbatim quote"]]. Answer every question id listed."#;

const SUMMARY_FORMAT: &str = r#"Keep the summary under 200 words. Support key claims with inline
markers of the form [[cite:file name:"verbatim quote"]] where the quote is copied from
the answers above."#;

pub fn single_question(document_name: &str, text: &str, question: &str) -> Vec<Message> {
    vec![
        Message::system(format!("{ANALYST_ROLE}\n\n{SINGLE_FORMAT}")),
        Message::user(format!(
            "File: {document_name}\n\nDocument:\n\n{text}\n\n---\n\nQuestion: {question}"
        )),
    ]
}

/// Questions are listed as `N. [id] question` so answers can be keyed by id.
pub fn row_wise(document_name: &str, text: &str, columns: &[Column]) -> Vec<Message> {
    let questions: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, column)| format!("{}. [{}] {}", i + 1, column.id, column.question))
        .collect();
    vec![
        Message::system(format!("{ANALYST_ROLE}\n\n{ROW_FORMAT}")),
        Message::user(format!(
            "File: {document_name}\n\nDocument:\n\n{text}\n\n---\n\nQuestions:\n{}\n\n",
            questions.join("\n")
        )),
    ]
}

pub fn row_summary(document_name: &str, answers: &[(String, String)]) -> Vec<Message> {
    let body: Vec<String> = answers
        .iter()
        .map(|(question, answer)| format!("Q: {question}\nA: {answer}"))
        .collect();
    summary(format!(
        "Summarize what we learned about the file {document_name}.\n\n{}",
        body.join("\n\n")
    ))
}

pub fn column_summary(question: &str, answers: &[(String, String)]) -> Vec<Message> {
    let body: Vec<String> = answers
        .iter()
        .map(|(document, answer)| format!("Source file: {document}\nAnswer: {answer}"))
        .collect();
    summary(format!(
        "Compare how each file answers the question \"{question}\". Point out agreements, \
         differences and gaps.\n\n{}",
        body.join("\n\n")
    ))
}

pub fn overall_summary(project: &str, parts: &[(String, String)]) -> Vec<Message> {
    let body: Vec<String> = parts
        .iter()
        .enumerate()
        .map(|(i, (label, text))| format!("Summary {} ({label}):\n{text}", i + 1))
        .collect();
    summary(format!(
        "Write an executive overview of the project {project} from these summaries.\n\n{}",
        body.join("\n\n")
    ))
}

fn summary(user: String) -> Vec<Message> {
    vec![
        Message::system(format!("{SUMMARY_ROLE}\n\n{SUMMARY_FORMAT}")),
        Message::user(user),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_prompt_lists_question_ids() {
        let columns = vec![Column::new("q1", "Who?"), Column::new("q2", "When?")];
        let messages = row_wise("a.txt", "body", &columns);
        let user = &messages[1].content;
        assert!(user.contains("Document:\n\nbody\n\n---"));
        assert!(user.contains("1. [q1] Who?\n2. [q2] When?"));
    }

    #[test]
    fn summary_prompts_carry_no_document_block() {
        let answers = vec![("a.txt".to_string(), "yes".to_string())];
        for messages in [
            row_summary("a.txt", &answers),
            column_summary("Who?", &answers),
            overall_summary("demo", &answers),
        ] {
            assert!(!messages[1].content.contains("Document:"));
            assert!(!messages[1].content.contains("Questions:"));
        }
    }
}
