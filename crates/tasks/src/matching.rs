const COMPLETION_WORDS: &[&str] = &["done", "finished", "completed", "complete", "success"];

/// Whether a cycle's user input refers to the task titled `title`.
///
/// Either the whole title appears in the input, or the input carries a
/// completion word and at least 80% of the title's significant words (three or
/// more characters, at least three of them).
pub fn matches_cycle(title: &str, input: &str) -> bool {
    let title = title.trim().to_lowercase();
    let input = input.trim().to_lowercase();

    if title.is_empty() {
        return false;
    }
    if input.contains(&title) {
        return true;
    }

    let has_completion_word = COMPLETION_WORDS.iter().any(|w| input.contains(w));
    if !has_completion_word {
        return false;
    }

    let words: Vec<&str> = title
        .split_whitespace()
        .filter(|w| w.chars().count() >= 3)
        .collect();
    if words.len() < 3 {
        return false;
    }

    let matched = words.iter().filter(|w| input.contains(**w)).count();
    matched * 5 >= words.len() * 4
}
