//! Semantic block detection
//!
//! Embeds successive sentences and splits where their similarity drops
//! below an adaptive threshold (mean minus one standard deviation). The
//! resulting blocks are re-split recursively by the caller to honor the
//! token budget.

use unicode_segmentation::UnicodeSegmentation;

use crate::error::Result;
use crate::providers::EmbeddingsProvider;
use crate::vector_store::retriever::cosine_similarity;

/// Group sentences into topically coherent blocks.
pub(crate) async fn semantic_blocks(
    text: &str,
    embedder: &dyn EmbeddingsProvider,
) -> Result<Vec<String>> {
    let sentences: Vec<&str> = text.split_sentence_bounds().collect();
    let meaningful = sentences.iter().filter(|s| !s.trim().is_empty()).count();
    if meaningful <= 2 {
        return Ok(vec![text.to_string()]);
    }

    // Blank segments carry no signal; embed a placeholder so indices align.
    let inputs: Vec<String> = sentences
        .iter()
        .map(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() { " " } else { trimmed }.to_string()
        })
        .collect();
    let vectors = embedder.embed_documents(&inputs).await?;
    if vectors.len() != sentences.len() {
        // Defensively keep the text whole rather than misalign boundaries.
        tracing::warn!(
            expected = sentences.len(),
            got = vectors.len(),
            "embedding count mismatch during semantic chunking"
        );
        return Ok(vec![text.to_string()]);
    }

    let similarities: Vec<f32> = vectors
        .windows(2)
        .map(|pair| cosine_similarity(&pair[0], &pair[1]))
        .collect();
    let threshold = adaptive_threshold(&similarities);

    let mut blocks = Vec::new();
    let mut current = String::new();
    for (i, sentence) in sentences.iter().enumerate() {
        current.push_str(sentence);
        let boundary = i < similarities.len() && similarities[i] < threshold;
        if boundary && !current.trim().is_empty() {
            blocks.push(std::mem::take(&mut current));
        }
    }
    if !current.trim().is_empty() {
        blocks.push(current);
    }
    if blocks.is_empty() {
        blocks.push(text.to_string());
    }
    Ok(blocks)
}

fn adaptive_threshold(similarities: &[f32]) -> f32 {
    if similarities.is_empty() {
        return f32::MIN;
    }
    let mean = similarities.iter().sum::<f32>() / similarities.len() as f32;
    let variance = similarities
        .iter()
        .map(|s| (s - mean).powi(2))
        .sum::<f32>()
        / similarities.len() as f32;
    mean - variance.sqrt()
}
