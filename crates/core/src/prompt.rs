use crate::store::ScoredFragment;
use crate::traits::ChatRequest;

pub const SYSTEM_PROMPT: &str = "You are an expert Q&A system that answers questions about a \
collection of PDF documents. Always answer the query using the provided context information, \
and not prior knowledge. Never directly reference the given context in your answer.";

pub fn format_context(hits: &[ScoredFragment]) -> String {
    if hits.is_empty() {
        return "(no context found)".to_string();
    }

    hits.iter()
        .enumerate()
        .map(|(position, hit)| {
            let page = hit.fragment.page.as_deref().unwrap_or("?");
            format!(
                "[{}] {} (page {})\n{}",
                position + 1,
                hit.fragment.document,
                page,
                hit.fragment.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_question_prompt(question: &str, hits: &[ScoredFragment]) -> ChatRequest {
    let user = format!(
        "Context information is below.\n---------------------\n{}\n---------------------\n\
         Given the context information and not prior knowledge, answer the query.\n\
         Query: {}\nAnswer: ",
        format_context(hits),
        question.trim()
    );

    ChatRequest {
        system: Some(SYSTEM_PROMPT.to_string()),
        user,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoredFragment;

    fn hit(text: &str, document: &str, page: Option<&str>) -> ScoredFragment {
        ScoredFragment {
            fragment: StoredFragment {
                id: text.to_string(),
                text: text.to_string(),
                document: document.to_string(),
                page: page.map(str::to_string),
                filesize: 0,
                embedding: vec![1.0],
            },
            score: 0.5,
        }
    }

    #[test]
    fn context_lists_document_and_page() {
        let context = format_context(&[
            hit("Bearings need grease.", "manual.pdf", Some("2")),
            hit("Keep the receipt.", "warranty.pdf", None),
        ]);
        assert_eq!(
            context,
            "[1] manual.pdf (page 2)\nBearings need grease.\n\n[2] warranty.pdf (page ?)\nKeep the receipt."
        );
    }

    #[test]
    fn prompt_embeds_question_and_context() {
        let request = build_question_prompt("  How often to grease?  ", &[hit("Weekly.", "m.pdf", Some("1"))]);
        assert!(request.user.contains("Query: How often to grease?\n"));
        assert!(request.user.contains("[1] m.pdf (page 1)\nWeekly."));
        assert_eq!(request.system.as_deref(), Some(SYSTEM_PROMPT));
    }

    #[test]
    fn empty_context_is_explicit() {
        assert_eq!(format_context(&[]), "(no context found)");
    }
}
