use std::fmt;

/// What a single inbound message asks for, by keyword rules only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Greeting,
    MenuRequest,
    Choice(MenuChoice),
    Subject(Subject),
    Exam,
    Homework,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    ExamPrep,
    HomeworkHelp,
    Practice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subject {
    Math,
    Science,
}

impl Subject {
    pub fn as_str(self) -> &'static str {
        match self {
            Subject::Math => "math",
            Subject::Science => "science",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intent::Greeting => f.write_str("greeting"),
            Intent::MenuRequest => f.write_str("menu_request"),
            Intent::Choice(MenuChoice::ExamPrep) => f.write_str("choice_1"),
            Intent::Choice(MenuChoice::HomeworkHelp) => f.write_str("choice_2"),
            Intent::Choice(MenuChoice::Practice) => f.write_str("choice_3"),
            Intent::Subject(subject) => write!(f, "subject_{}", subject.as_str()),
            Intent::Exam => f.write_str("exam"),
            Intent::Homework => f.write_str("homework"),
            Intent::Fallback => f.write_str("fallback"),
        }
    }
}

// Short words are compared against whole tokens so "this" or "history" do not greet.
const GREETING_WORDS: &[&str] = &["hi", "hey", "hello", "howzit", "hallo", "start"];
const GREETING_PHRASES: &[&str] = &["good morning", "good afternoon", "good evening"];
const MENU_TERMS: &[&str] = &["menu", "help", "options"];
const MATH_TERMS: &[&str] = &[
    "math",
    "algebra",
    "geometry",
    "calculus",
    "trigonometry",
    "equation",
];
const SCIENCE_TERMS: &[&str] = &["science", "physics", "chemistry", "biology"];
// Mode-entering words are whole tokens so "example" or "examine" stay idle.
const EXAM_WORDS: &[&str] = &["exam", "exams", "revision"];
const EXAM_PHRASES: &[&str] = &["test prep", "study plan"];
const HOMEWORK_WORDS: &[&str] = &["homework", "assignment", "assignments"];
const RETURN_WORDS: &[&str] = &["back", "exit", "cancel", "0"];

pub fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

fn tokens(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
}

fn contains_token(text: &str, words: &[&str]) -> bool {
    tokens(text).any(|token| words.contains(&token))
}

fn contains_any(text: &str, terms: &[&str]) -> bool {
    terms.iter().any(|term| text.contains(term))
}

/// Maps free text to an intent. The checks run in a fixed order and the
/// first hit wins; menu digits must be the whole message.
pub fn classify(text: &str) -> Intent {
    let text = normalize(text);
    if text.is_empty() {
        return Intent::Greeting;
    }

    if contains_token(&text, GREETING_WORDS)
        || contains_any(&text, GREETING_PHRASES)
    {
        return Intent::Greeting;
    }
    if contains_any(&text, MENU_TERMS) {
        return Intent::MenuRequest;
    }
    match text.as_str() {
        "1" => return Intent::Choice(MenuChoice::ExamPrep),
        "2" => return Intent::Choice(MenuChoice::HomeworkHelp),
        "3" => return Intent::Choice(MenuChoice::Practice),
        _ => {}
    }
    if let Some(subject) = detect_subject(&text) {
        return Intent::Subject(subject);
    }
    if contains_token(&text, EXAM_WORDS) || contains_any(&text, EXAM_PHRASES) {
        return Intent::Exam;
    }
    if contains_token(&text, HOMEWORK_WORDS) {
        return Intent::Homework;
    }
    Intent::Fallback
}

pub fn detect_subject(text: &str) -> Option<Subject> {
    let text = normalize(text);
    if contains_any(&text, MATH_TERMS) {
        Some(Subject::Math)
    } else if contains_any(&text, SCIENCE_TERMS) {
        Some(Subject::Science)
    } else {
        None
    }
}

/// The explicit phrases that leave an active mode.
///
/// Narrower than the idle menu request: inside a mode "help" and "options"
/// are questions for the tutor, so only `menu` and the exact return words
/// (`back`, `exit`, `cancel`, `0`) leave.
pub fn is_return_to_menu(text: &str) -> bool {
    let text = normalize(text);
    text.contains("menu") || RETURN_WORDS.contains(&text.as_str())
}
