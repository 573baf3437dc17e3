//! Pull a JSON document out of a model response.

/// Extract the JSON payload from a response that may wrap it in a markdown
/// fence or surround it with prose.
///
/// Priority:
/// 1. The first fenced block tagged `json`
/// 2. The first untagged fenced block
/// 3. The span from the first `{` or `[` to the matching last `}` or `]`
/// 4. The trimmed response itself
pub fn extract_json(response: &str) -> String {
    let mut json_block = None;
    let mut generic_block = None;
    let mut in_block = false;
    let mut is_json = false;
    let mut current = String::new();

    for line in response.lines() {
        let trimmed = line.trim();

        if !in_block && trimmed.starts_with("```") {
            in_block = true;
            let lang = trimmed.trim_start_matches('`').trim().to_lowercase();
            // Blocks in any other language are kept as a fallback.
            is_json = lang == "json";
            current.clear();
            continue;
        }

        if in_block && trimmed == "```" {
            in_block = false;
            if is_json && json_block.is_none() {
                json_block = Some(current.clone());
            } else if generic_block.is_none() {
                generic_block = Some(current.clone());
            }
            continue;
        }

        if in_block {
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
        }
    }

    // Unclosed fence: treat what was accumulated as a block.
    if in_block && !current.is_empty() {
        if is_json && json_block.is_none() {
            json_block = Some(current.clone());
        } else if generic_block.is_none() {
            generic_block = Some(current);
        }
    }

    if let Some(block) = json_block.or(generic_block) {
        return block.trim().to_string();
    }

    bracketed_span(response)
        .unwrap_or(response.trim())
        .to_string()
}

fn bracketed_span(response: &str) -> Option<&str> {
    let start = response.find(['{', '['])?;
    let closer = if response[start..].starts_with('{') { '}' } else { ']' };
    let end = response.rfind(closer)?;
    (end > start).then(|| &response[start..=end])
}
