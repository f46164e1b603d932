/// Format a finger key for display (replace dashes, capitalize).
pub fn display_finger_name(name: &str) -> String {
    let spaced = name.replace('-', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finger_names_are_humanized() {
        assert_eq!(display_finger_name("left-thumb"), "Left thumb");
        assert_eq!(
            display_finger_name("right-index-finger"),
            "Right index finger"
        );
    }

    #[test]
    fn empty_name_stays_empty() {
        assert_eq!(display_finger_name(""), "");
    }
}
