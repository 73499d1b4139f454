//! Lineage reconstruction over cooked calls.
//!
//! The capture log knows nothing about which call continued which
//! conversation, so parentage is inferred from payload content alone. A
//! call's parent is the earlier same-model call whose expected continuation
//! (its prompt plus its response) is closest, by edit distance over message
//! ids, to the call's own prompt. Calls that are not close enough to any
//! candidate become forest roots, so unrelated sessions sharing one log
//! stay separate.

use std::collections::HashSet;

use shared_types::CookedRequest;

/// Divergence penalty per tool added or removed between two calls.
const TOOL_DIVERGENCE_WEIGHT: f64 = 0.5;

/// Assign `parent_id` across the whole set. Processing order is timestamp
/// ascending (stable on id), so every parent strictly precedes its child
/// and the resulting graph is a forest by construction.
pub fn assign_parents(requests: &mut [CookedRequest]) {
    let mut order: Vec<usize> = (0..requests.len()).collect();
    order.sort_by(|&a, &b| {
        (requests[a].timestamp, &requests[a].id).cmp(&(requests[b].timestamp, &requests[b].id))
    });

    for pos in 0..order.len() {
        let r_idx = order[pos];
        let mut best: Option<(usize, f64)> = None;

        // Earlier calls only, newest first: on equal scores the most recent
        // candidate wins because later ones must strictly improve.
        for &c_idx in order[..pos].iter().rev() {
            let candidate = &requests[c_idx];
            let request = &requests[r_idx];
            if candidate.timestamp >= request.timestamp || candidate.model != request.model {
                continue;
            }
            let score = candidate_score(candidate, request);
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((c_idx, score)),
            }
        }

        let parent = match best {
            Some((c_idx, score)) if score >= acceptance_threshold(&requests[r_idx]) => {
                Some(requests[c_idx].id.clone())
            }
            _ => None,
        };
        requests[r_idx].parent_id = parent;
    }
}

/// Prompts are allowed half a unit of divergence per message before a call
/// is considered a fresh root.
fn acceptance_threshold(request: &CookedRequest) -> f64 {
    -0.5 * request.request_messages.len() as f64
}

fn candidate_score(candidate: &CookedRequest, request: &CookedRequest) -> f64 {
    let mut expected: Vec<&str> = candidate
        .request_messages
        .iter()
        .map(String::as_str)
        .collect();
    expected.extend(candidate.response_messages.iter().map(String::as_str));

    let prompt: Vec<&str> = request
        .request_messages
        .iter()
        .map(String::as_str)
        .collect();

    let message_score = -(levenshtein(&expected, &prompt) as f64);

    let candidate_tools: HashSet<&str> = candidate.tools.iter().map(String::as_str).collect();
    let request_tools: HashSet<&str> = request.tools.iter().map(String::as_str).collect();
    let divergence = candidate_tools.symmetric_difference(&request_tools).count();

    message_score - TOOL_DIVERGENCE_WEIGHT * divergence as f64
}

/// Unit-cost edit distance over id sequences. Equal ids inherit the
/// diagonal; add, delete, and substitute all cost one.
pub fn levenshtein(a: &[&str], b: &[&str]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, a_item) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, b_item) in b.iter().enumerate() {
            current[j + 1] = if a_item == b_item {
                prev[j]
            } else {
                1 + prev[j].min(prev[j + 1]).min(current[j])
            };
        }
        std::mem::swap(&mut prev, &mut current);
    }

    prev[b.len()]
}
