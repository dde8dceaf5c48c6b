pub const SOLVE_SYSTEM: &str = include_str!("../data/prompts/solve_system.txt");
pub const SOLVE_USER: &str = include_str!("../data/prompts/solve_user.txt");

/// Replace `{{key}}` placeholders in a template string.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut result = template.to_string();
    for (key, value) in vars {
        result = result.replace(&format!("{{{{{}}}}}", key), value);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_single_var() {
        assert_eq!(
            render("Hello {{name}}!", &[("name", "world")]),
            "Hello world!"
        );
    }

    #[test]
    fn test_render_leaves_unknown_placeholders() {
        assert_eq!(render("{{a}} and {{b}}", &[("a", "cats")]), "cats and {{b}}");
    }

    #[test]
    fn test_prompts_are_non_empty() {
        assert!(!SOLVE_SYSTEM.trim().is_empty());
        assert!(!SOLVE_USER.trim().is_empty());
    }

    #[test]
    fn test_solve_user_has_question_placeholder() {
        assert!(SOLVE_USER.contains("{{question}}"));
    }
}
