//! Input handed to the external answer-generation model.
//!
//! Retrieval stops here: the crate never calls a language model itself.

use std::fmt::Write;

use serde::Serialize;

use crate::retriever::RetrievalResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnswerRequest {
    pub query: String,
    /// The `<code_context>` block, empty when nothing was retrieved.
    pub context: String,
    /// One `path :: symbol (lines a-b)` entry per chunk, in rank order.
    pub citations: Vec<String>,
}

impl AnswerRequest {
    #[must_use]
    pub fn from_result(result: &RetrievalResult) -> Self {
        Self {
            query: result.query.clone(),
            context: result.context.clone(),
            citations: result.citations(),
        }
    }

    #[must_use]
    pub fn has_context(&self) -> bool {
        !self.context.is_empty()
    }

    /// Prompt text for a code-assistant model.
    #[must_use]
    pub fn prompt(&self) -> String {
        let mut out = String::from(
            "Answer the question using the code context below. \
             Cite the files and line ranges you rely on. \
             If the context does not answer the question, say so.\n\n",
        );
        if self.has_context() {
            out.push_str(&self.context);
            out.push_str("\n\n");
        } else {
            out.push_str("<code_context/>\n\n");
        }
        if !self.citations.is_empty() {
            out.push_str("Sources:\n");
            for (i, c) in self.citations.iter().enumerate() {
                let _ = writeln!(out, "[{}] {c}", i + 1);
            }
            out.push('\n');
        }
        let _ = write!(out, "Question: {}", self.query);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(context: &str) -> RetrievalResult {
        RetrievalResult {
            query: "where is add defined?".into(),
            chunks: Vec::new(),
            context: context.into(),
            total_tokens: 0,
            candidates: 0,
        }
    }

    #[test]
    fn prompt_lists_context_then_question() {
        let mut request = AnswerRequest::from_result(&result("<code_context>\n</code_context>"));
        request.citations = vec!["math.py :: add (lines 1-1)".into()];
        let prompt = request.prompt();
        let ctx = prompt.find("<code_context>").unwrap();
        let src = prompt.find("[1] math.py :: add (lines 1-1)").unwrap();
        let q = prompt.find("Question: where is add defined?").unwrap();
        assert!(ctx < src && src < q);
    }

    #[test]
    fn empty_result_has_no_context() {
        let request = AnswerRequest::from_result(&result(""));
        assert!(!request.has_context());
        assert!(request.citations.is_empty());
        assert!(request.prompt().contains("<code_context/>"));
        assert!(!request.prompt().contains("Sources:"));
    }
}
