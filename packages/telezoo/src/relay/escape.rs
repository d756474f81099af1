/// Emphasis marker. A closed pair (`**`) becomes one bold marker, a lone one
/// is shown literally.
const EMPHASIS: char = '*';
/// Would start a bullet list at line start; always shown literally.
const LIST_START: char = '-';

const ESCAPE: char = '\\';

fn is_reserved(c: char) -> bool {
    c == EMPHASIS || c == LIST_START
}

/// Position inside a run of emphasis markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Plain,
    SeenOne,
    SeenTwo,
}

/// Escape model output for Telegram markdown in one left-to-right pass.
///
/// - a run of one `*` becomes `\*`
/// - a run of two `*` is kept as a single bold marker `*`
/// - longer runs emit one `*` per pair and `\*` for an odd leftover
/// - `-` becomes `\-`
/// - a backslash already in front of a reserved character is kept as is,
///   so text that is already escaped does not gain more backslashes
pub fn escape_markdown(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + input.len() / 8);
    let mut state = State::Plain;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == EMPHASIS {
            state = match state {
                State::Plain => State::SeenOne,
                State::SeenOne => State::SeenTwo,
                State::SeenTwo => {
                    out.push(EMPHASIS);
                    State::SeenOne
                }
            };
            continue;
        }

        flush_run(&mut out, state);
        state = State::Plain;

        match c {
            ESCAPE => {
                out.push(ESCAPE);
                if let Some(&next) = chars.peek()
                    && is_reserved(next)
                {
                    out.push(next);
                    chars.next();
                }
            }
            LIST_START => {
                out.push(ESCAPE);
                out.push(LIST_START);
            }
            _ => out.push(c),
        }
    }
    flush_run(&mut out, state);

    out
}

fn flush_run(out: &mut String, state: State) {
    match state {
        State::Plain => {}
        State::SeenOne => {
            out.push(ESCAPE);
            out.push(EMPHASIS);
        }
        State::SeenTwo => out.push(EMPHASIS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_untouched() {
        assert_eq!(escape_markdown("Hello, world!"), "Hello, world!");
        assert_eq!(escape_markdown(""), "");
    }

    #[test]
    fn lone_asterisk_is_escaped() {
        assert_eq!(escape_markdown("2 * 3"), "2 \\* 3");
        assert_eq!(escape_markdown("*"), "\\*");
    }

    #[test]
    fn pair_becomes_bold_marker() {
        assert_eq!(escape_markdown("**bold** text"), "*bold* text");
    }

    #[test]
    fn long_runs_emit_pairs_then_leftover() {
        assert_eq!(escape_markdown("***"), "*\\*");
        assert_eq!(escape_markdown("****"), "**");
        assert_eq!(escape_markdown("a*****b"), "a**\\*b");
    }

    #[test]
    fn list_start_is_escaped() {
        assert_eq!(escape_markdown("- item\n- other"), "\\- item\n\\- other");
        assert_eq!(escape_markdown("well-known"), "well\\-known");
    }

    #[test]
    fn escaped_markers_pass_through() {
        assert_eq!(escape_markdown("\\* and \\-"), "\\* and \\-");
        // A backslash before anything else is an ordinary character
        assert_eq!(escape_markdown("C:\\temp"), "C:\\temp");
        assert_eq!(escape_markdown("end\\"), "end\\");
    }

    #[test]
    fn second_pass_adds_no_escapes() {
        for input in ["2 * 3", "- a\n- b", "x - y * z", "\\* kept"] {
            let once = escape_markdown(input);
            let twice = escape_markdown(&once);
            assert_eq!(
                once.matches('\\').count(),
                twice.matches('\\').count(),
                "input {input:?}"
            );
        }
    }

    #[test]
    fn escaped_text_is_a_fixpoint_without_pairs() {
        let once = escape_markdown("cost * 2 - tax \\* 3");
        assert_eq!(escape_markdown(&once), once);
    }

    #[test]
    fn pairs_are_consumed_by_the_first_pass() {
        // A pair collapses to one marker, which a second pass reads as lone
        let once = escape_markdown("**bold** text");
        assert_eq!(once, "*bold* text");
        assert_eq!(escape_markdown(&once), "\\*bold\\* text");
        assert_ne!(escape_markdown(&once), once);
    }

    #[test]
    fn unicode_is_preserved() {
        assert_eq!(escape_markdown("Привет *мир*"), "Привет \\*мир\\*");
    }
}
