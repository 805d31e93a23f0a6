//! Query-type-specific prompt templates
//!
//! Every template instructs the model to answer only from the supplied
//! context and to say so when the context is insufficient. Templates have
//! two holes: `{context}` and `{question}`.

use crate::types::QueryType;

const GENERAL_SYSTEM: &str = "You are a helpful assistant that answers questions based on the provided documents.\n\n\
Provide clear, concise answers directly addressing the user's question.\n\
If the answer isn't in the documents, say so clearly.\n\
Keep responses focused and to the point.";

const GENERAL_USER: &str = "Answer the following question based on these documents:\n\n\
Documents:\n{context}\n\n\
Question: {question}\n\n\
Answer:";

const RESEARCH_SYSTEM: &str = "You are a research assistant providing detailed, well-sourced answers.\n\n\
Guidelines:\n\
- Provide comprehensive answers with multiple perspectives\n\
- Always cite sources (document numbers)\n\
- Include relevant details and nuances\n\
- Highlight key concepts and relationships\n\
- If there are different viewpoints, present them all\n\
- Answer only from the provided documents; say so when they are insufficient";

const RESEARCH_USER: &str = "Provide a detailed research answer to the following question based on these documents:\n\n\
Documents:\n{context}\n\n\
Question: {question}\n\n\
Include:\n\
1. Direct answer to the question\n\
2. Supporting details from documents\n\
3. Source citations\n\
4. Related concepts\n\n\
Answer:";

const SPECIFIC_SYSTEM: &str = "You are a subject matter expert answering domain-specific questions.\n\n\
Guidelines:\n\
- Use technical terminology appropriately\n\
- Focus on the most relevant information\n\
- Provide practical, actionable insights\n\
- Reference specific document sections\n\
- Answer only from the provided documents; state clearly when they do not cover the question";

const SPECIFIC_USER: &str = "Answer this specific domain question based on the documents:\n\n\
Documents:\n{context}\n\n\
Question: {question}\n\n\
Provide a focused, expert answer:";

const COMPLEX_SYSTEM: &str = "You are an analytical assistant handling complex questions requiring synthesis and reasoning.\n\n\
Guidelines:\n\
- Break down complex questions into components\n\
- Synthesize information from multiple documents\n\
- Show your reasoning step-by-step\n\
- Identify assumptions and limitations\n\
- Use only the provided documents; note where they are insufficient";

const COMPLEX_USER: &str = "Analyze and answer this complex question using the provided documents:\n\n\
Documents:\n{context}\n\n\
Question: {question}\n\n\
Provide:\n\
1. Question breakdown\n\
2. Key findings from each relevant source\n\
3. Synthesis and analysis\n\
4. Conclusions\n\
5. Any open questions or limitations\n\n\
Answer:";

/// (system, user-template) pair for a query type
pub(crate) fn templates(query_type: QueryType) -> (&'static str, &'static str) {
    match query_type {
        QueryType::General => (GENERAL_SYSTEM, GENERAL_USER),
        QueryType::Research => (RESEARCH_SYSTEM, RESEARCH_USER),
        QueryType::Specific => (SPECIFIC_SYSTEM, SPECIFIC_USER),
        QueryType::Complex => (COMPLEX_SYSTEM, COMPLEX_USER),
    }
}

/// Fill the template holes.
pub(crate) fn render(template: &str, context: &str, question: &str) -> String {
    template
        .replace("{context}", context)
        .replace("{question}", question)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_template_has_both_holes() {
        for qt in [
            QueryType::General,
            QueryType::Research,
            QueryType::Specific,
            QueryType::Complex,
        ] {
            let (system, user) = templates(qt);
            assert!(!system.is_empty());
            assert!(user.contains("{context}"), "{qt:?} user template misses context");
            assert!(user.contains("{question}"), "{qt:?} user template misses question");
        }
    }

    #[test]
    fn templates_differ_by_query_type() {
        assert_ne!(templates(QueryType::General).0, templates(QueryType::Research).0);
        assert_ne!(templates(QueryType::Specific).1, templates(QueryType::Complex).1);
    }

    #[test]
    fn render_substitutes_holes() {
        let rendered = render("C={context} Q={question}", "ctx", "why?");
        assert_eq!(rendered, "C=ctx Q=why?");
    }
}
