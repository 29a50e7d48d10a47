use minijinja::{context, Environment};

const TUTOR_PROMPT_TEMPLATE: &str = include_str!("prompts/tutor_prompt.j2");

pub const GENERAL_CONTEXT: &str = "general";

pub struct TutorPromptContext<'a> {
    pub bot_name: &'a str,
    /// Mode name, or `general` when no mode is active.
    pub mode: &'a str,
    pub subject: Option<&'a str>,
    pub exam_date: Option<&'a str>,
}

pub fn render_tutor_prompt(ctx: &TutorPromptContext<'_>) -> String {
    let mut env = Environment::new();
    if env
        .add_template("tutor_prompt", TUTOR_PROMPT_TEMPLATE)
        .is_err()
    {
        return fallback_tutor_prompt(ctx);
    }

    let Ok(template) = env.get_template("tutor_prompt") else {
        return fallback_tutor_prompt(ctx);
    };

    template
        .render(context! {
            bot_name => bot_name(ctx),
            grades => "10-11",
            mode => ctx.mode,
            subject => ctx.subject.map(str::trim).filter(|s| !s.is_empty()),
            exam_date => ctx.exam_date.map(str::trim).filter(|s| !s.is_empty()),
        })
        .map(|prompt| prompt.trim().to_string())
        .unwrap_or_else(|_| fallback_tutor_prompt(ctx))
}

fn bot_name<'a>(ctx: &TutorPromptContext<'a>) -> &'a str {
    if ctx.bot_name.trim().is_empty() {
        "GOAT Bot"
    } else {
        ctx.bot_name.trim()
    }
}

fn fallback_tutor_prompt(ctx: &TutorPromptContext<'_>) -> String {
    let mut prompt = format!(
        "You are {}, a friendly study companion for Grade 10-11 students.\n\
         Be accurate, encouraging and concise. Never invent facts.\n",
        bot_name(ctx)
    );

    if ctx.mode != GENERAL_CONTEXT {
        prompt.push_str("\nCurrent activity: ");
        prompt.push_str(ctx.mode);
        prompt.push('\n');
    }
    if let Some(subject) = ctx.subject.filter(|s| !s.trim().is_empty()) {
        prompt.push_str("Subject: ");
        prompt.push_str(subject.trim());
        prompt.push('\n');
    }
    if let Some(date) = ctx.exam_date.filter(|s| !s.trim().is_empty()) {
        prompt.push_str("Exam date: ");
        prompt.push_str(date.trim());
        prompt.push('\n');
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exam_prompt_carries_subject_and_date() {
        let prompt = render_tutor_prompt(&TutorPromptContext {
            bot_name: "",
            mode: "exam_prep",
            subject: Some("math"),
            exam_date: Some("2026-11-02"),
        });
        assert!(prompt.starts_with("You are GOAT Bot"));
        assert!(prompt.contains("preparing for an exam"));
        assert!(prompt.contains("The exam subject is math."));
        assert!(prompt.contains("2026-11-02"));
    }

    #[test]
    fn general_prompt_suggests_the_menu() {
        let prompt = render_tutor_prompt(&TutorPromptContext {
            bot_name: "GOAT Bot",
            mode: GENERAL_CONTEXT,
            subject: None,
            exam_date: None,
        });
        assert!(prompt.contains("has not picked a feature"));
        assert!(!prompt.contains("exam subject"));
    }

    #[test]
    fn fallback_prompt_lists_context() {
        let prompt = fallback_tutor_prompt(&TutorPromptContext {
            bot_name: "Tutor",
            mode: "homework_help",
            subject: Some(" science "),
            exam_date: None,
        });
        assert!(prompt.starts_with("You are Tutor"));
        assert!(prompt.contains("Current activity: homework_help"));
        assert!(prompt.contains("Subject: science"));
    }
}
