use std::iter::Peekable;
use std::str::Chars;

/// One parsed command line. Debug shortcuts are expanded during parsing, so
/// handlers only ever see the canonical forms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Empty,
    Define { database: String, word: String },
    Match { database: String, strategy: String, word: String },
    Show(ShowParam),
    Client(String),
    Status,
    Help,
    Quit,
    Option,
    Auth,
    SaslAuth,
    SaslResp,
    Time { count: u32, command: Box<Command> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShowParam {
    Databases,
    Strategies,
    Info(String),
    Server,
}

/// On failure, the canonical verb recognized before the arguments went wrong,
/// or `None` when no verb was recognized. The session maps these to 501 and
/// 500 respectively.
pub type SyntaxError = Option<&'static str>;

struct LexError;

struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
}

fn is_ctl(c: char) -> bool {
    (c as u32) < 0x20 || c == '\u{7f}'
}

fn is_ws(c: char) -> bool {
    c == ' ' || c == '\t'
}

fn is_atom_char(c: char) -> bool {
    !is_ws(c) && !is_ctl(c) && c != '"' && c != '\'' && c != '\\'
}

impl<'a> Lexer<'a> {
    fn new(line: &'a str) -> Lexer<'a> {
        Lexer {
            chars: line.chars().peekable(),
        }
    }

    fn skip_ws(&mut self) -> String {
        let mut ws = String::new();
        while let Some(&c) = self.chars.peek() {
            if !is_ws(c) {
                break;
            }
            ws.push(c);
            self.chars.next();
        }
        ws
    }

    fn at_end(&mut self) -> bool {
        self.chars.peek().is_none()
    }

    fn quoted_pair(&mut self, word: &mut String) -> Result<(), LexError> {
        self.chars.next();
        match self.chars.next() {
            Some(c) => {
                word.push(c);
                Ok(())
            }
            None => Err(LexError),
        }
    }

    fn quoted_string(&mut self, quote: char, word: &mut String) -> Result<(), LexError> {
        self.chars.next();
        loop {
            match self.chars.peek() {
                Some(&c) if c == quote => {
                    self.chars.next();
                    return Ok(());
                }
                Some('\\') => self.quoted_pair(word)?,
                Some(&c) if is_ctl(c) => return Err(LexError),
                Some(&c) => {
                    word.push(c);
                    self.chars.next();
                }
                None => return Err(LexError),
            }
        }
    }

    /// Reads the next word: adjacent atoms, quoted strings and quoted pairs
    /// concatenated. `Ok(None)` at end of input. A character that cannot
    /// start a word (a control character) is an error.
    fn next_word(&mut self) -> Result<Option<String>, LexError> {
        self.skip_ws();
        if self.at_end() {
            return Ok(None);
        }
        let mut word = String::new();
        let mut any = false;
        loop {
            match self.chars.peek() {
                Some(&c) if is_atom_char(c) => {
                    word.push(c);
                    self.chars.next();
                }
                Some(&c) if c == '"' || c == '\'' => self.quoted_string(c, &mut word)?,
                Some('\\') => self.quoted_pair(&mut word)?,
                Some(&c) if is_ws(c) => break,
                Some(_) => {
                    // control character; the word ends here and the parse
                    // fails once the grammar looks past it
                    if any || !word.is_empty() {
                        break;
                    }
                    return Err(LexError);
                }
                None => break,
            }
            any = true;
        }
        if !any {
            return Err(LexError);
        }
        Ok(Some(word))
    }

    /// Reads free text: words joined with their literal separators, trimmed
    /// at both ends. `Ok(None)` when no text is present.
    fn next_text(&mut self) -> Result<Option<String>, LexError> {
        let mut text = match self.next_word()? {
            Some(word) => word,
            None => return Ok(None),
        };
        loop {
            let ws = self.skip_ws();
            if self.at_end() {
                return Ok(Some(text));
            }
            match self.next_word()? {
                Some(word) => {
                    text.push_str(&ws);
                    text.push_str(&word);
                }
                None => return Ok(Some(text)),
            }
        }
    }
}

pub fn parse(line: &str, debug: bool) -> Result<Command, SyntaxError> {
    let mut lexer = Lexer::new(line);
    parse_command(&mut lexer, debug, true)
}

fn parse_command(
    lexer: &mut Lexer,
    debug: bool,
    allow_time: bool,
) -> Result<Command, SyntaxError> {
    let first = match lexer.next_word() {
        Ok(Some(word)) => word,
        Ok(None) => return Ok(Command::Empty),
        Err(_) => return Err(None),
    };
    match first.to_uppercase().as_str() {
        "DEFINE" => parse_define(lexer),
        "D" if debug => parse_define_shortcut(lexer),
        "MATCH" => parse_match(lexer),
        "M" if debug => parse_match_shortcut(lexer),
        "SHOW" => parse_show(lexer),
        "CLIENT" => parse_client(lexer),
        "STATUS" => discard_text(lexer, "STATUS", Command::Status),
        "S" if debug => discard_text(lexer, "STATUS", Command::Status),
        "HELP" => discard_text(lexer, "HELP", Command::Help),
        "H" if debug => discard_text(lexer, "HELP", Command::Help),
        "QUIT" => discard_text(lexer, "QUIT", Command::Quit),
        "Q" if debug => discard_text(lexer, "QUIT", Command::Quit),
        "OPTION" => discard_text(lexer, "OPTION", Command::Option),
        "AUTH" => discard_text(lexer, "AUTH", Command::Auth),
        "SASLAUTH" => discard_text(lexer, "SASLAUTH", Command::SaslAuth),
        "SASLRESP" => discard_text(lexer, "SASLRESP", Command::SaslResp),
        "T" if debug && allow_time => parse_time(lexer, debug),
        _ => Err(None),
    }
}

fn require_word(lexer: &mut Lexer, verb: &'static str) -> Result<String, SyntaxError> {
    match lexer.next_word() {
        Ok(Some(word)) => Ok(word),
        _ => Err(Some(verb)),
    }
}

fn optional_word(lexer: &mut Lexer, verb: &'static str) -> Result<Option<String>, SyntaxError> {
    match lexer.next_word() {
        Ok(result) => Ok(result),
        Err(_) => Err(Some(verb)),
    }
}

fn expect_end(lexer: &mut Lexer, verb: &'static str) -> Result<(), SyntaxError> {
    lexer.skip_ws();
    if lexer.at_end() {
        Ok(())
    } else {
        Err(Some(verb))
    }
}

fn parse_define(lexer: &mut Lexer) -> Result<Command, SyntaxError> {
    let database = require_word(lexer, "DEFINE")?;
    let word = require_word(lexer, "DEFINE")?;
    expect_end(lexer, "DEFINE")?;
    Ok(Command::Define { database, word })
}

fn parse_define_shortcut(lexer: &mut Lexer) -> Result<Command, SyntaxError> {
    let first = require_word(lexer, "DEFINE")?;
    match optional_word(lexer, "DEFINE")? {
        Some(word) => {
            expect_end(lexer, "DEFINE")?;
            Ok(Command::Define {
                database: first,
                word,
            })
        }
        None => Ok(Command::Define {
            database: "*".to_string(),
            word: first,
        }),
    }
}

fn parse_match(lexer: &mut Lexer) -> Result<Command, SyntaxError> {
    let database = require_word(lexer, "MATCH")?;
    let strategy = require_word(lexer, "MATCH")?;
    let word = require_word(lexer, "MATCH")?;
    expect_end(lexer, "MATCH")?;
    Ok(Command::Match {
        database,
        strategy,
        word,
    })
}

fn parse_match_shortcut(lexer: &mut Lexer) -> Result<Command, SyntaxError> {
    let first = require_word(lexer, "MATCH")?;
    let second = match optional_word(lexer, "MATCH")? {
        Some(word) => word,
        None => {
            return Ok(Command::Match {
                database: "*".to_string(),
                strategy: ".".to_string(),
                word: first,
            })
        }
    };
    match optional_word(lexer, "MATCH")? {
        Some(third) => {
            expect_end(lexer, "MATCH")?;
            Ok(Command::Match {
                database: first,
                strategy: second,
                word: third,
            })
        }
        None => Ok(Command::Match {
            database: "*".to_string(),
            strategy: first,
            word: second,
        }),
    }
}

fn parse_show(lexer: &mut Lexer) -> Result<Command, SyntaxError> {
    let param = require_word(lexer, "SHOW")?;
    match param.to_uppercase().as_str() {
        "DB" | "DATABASES" => {
            expect_end(lexer, "SHOW")?;
            Ok(Command::Show(ShowParam::Databases))
        }
        "STRAT" | "STRATEGIES" => {
            expect_end(lexer, "SHOW")?;
            Ok(Command::Show(ShowParam::Strategies))
        }
        "INFO" => {
            let database = require_word(lexer, "SHOW")?;
            expect_end(lexer, "SHOW")?;
            Ok(Command::Show(ShowParam::Info(database)))
        }
        "SERVER" => match lexer.next_text() {
            Ok(_) => Ok(Command::Show(ShowParam::Server)),
            Err(_) => Err(Some("SHOW")),
        },
        _ => Err(Some("SHOW")),
    }
}

fn parse_client(lexer: &mut Lexer) -> Result<Command, SyntaxError> {
    match lexer.next_text() {
        Ok(text) => Ok(Command::Client(text.unwrap_or_default())),
        Err(_) => Err(Some("CLIENT")),
    }
}

fn discard_text(
    lexer: &mut Lexer,
    verb: &'static str,
    command: Command,
) -> Result<Command, SyntaxError> {
    match lexer.next_text() {
        Ok(_) => Ok(command),
        Err(_) => Err(Some(verb)),
    }
}

fn parse_time(lexer: &mut Lexer, debug: bool) -> Result<Command, SyntaxError> {
    let count = require_word(lexer, "T")?;
    if count.is_empty() || !count.chars().all(|c| c.is_ascii_digit()) {
        return Err(Some("T"));
    }
    let count: u32 = count.parse().map_err(|_| Some("T"))?;
    let command = parse_command(lexer, debug, false)?;
    Ok(Command::Time {
        count,
        command: Box::new(command),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(line: &str) -> Command {
        parse(line, false).unwrap()
    }

    fn parse_debug(line: &str) -> Command {
        parse(line, true).unwrap()
    }

    #[test]
    fn empty_line() {
        assert_eq!(parse_ok(""), Command::Empty);
        assert_eq!(parse_ok("   \t "), Command::Empty);
    }

    #[test]
    fn define_basic() {
        assert_eq!(
            parse_ok("DEFINE en cat"),
            Command::Define {
                database: "en".to_string(),
                word: "cat".to_string(),
            }
        );
    }

    #[test]
    fn verbs_are_case_insensitive() {
        assert_eq!(
            parse_ok("define en cat"),
            Command::Define {
                database: "en".to_string(),
                word: "cat".to_string(),
            }
        );
        assert_eq!(parse_ok("sHoW dAtAbAsEs"), Command::Show(ShowParam::Databases));
    }

    #[test]
    fn double_quoted_argument() {
        assert_eq!(
            parse_ok("DEFINE en \"the cat\""),
            Command::Define {
                database: "en".to_string(),
                word: "the cat".to_string(),
            }
        );
    }

    #[test]
    fn single_quoted_argument() {
        assert_eq!(
            parse_ok("DEFINE en 'the dog'"),
            Command::Define {
                database: "en".to_string(),
                word: "the dog".to_string(),
            }
        );
    }

    #[test]
    fn quoted_and_atom_concatenation() {
        assert_eq!(
            parse_ok("DEFINE en foo\"bar baz\"qux"),
            Command::Define {
                database: "en".to_string(),
                word: "foobar bazqux".to_string(),
            }
        );
    }

    #[test]
    fn quoted_pair_unescapes_any_char() {
        assert_eq!(
            parse_ok("DEFINE en ca\\\"t"),
            Command::Define {
                database: "en".to_string(),
                word: "ca\"t".to_string(),
            }
        );
        assert_eq!(
            parse_ok("DEFINE en a\\\\b"),
            Command::Define {
                database: "en".to_string(),
                word: "a\\b".to_string(),
            }
        );
        assert_eq!(
            parse_ok("DEFINE en the\\ cat"),
            Command::Define {
                database: "en".to_string(),
                word: "the cat".to_string(),
            }
        );
    }

    #[test]
    fn escape_inside_quotes() {
        assert_eq!(
            parse_ok("DEFINE en \"a \\\"b\\\" c\""),
            Command::Define {
                database: "en".to_string(),
                word: "a \"b\" c".to_string(),
            }
        );
    }

    #[test]
    fn unterminated_quote_is_illegal_parameters() {
        assert_eq!(parse("DEFINE en \"oops", false), Err(Some("DEFINE")));
    }

    #[test]
    fn trailing_backslash_is_illegal_parameters() {
        assert_eq!(parse("DEFINE en oops\\", false), Err(Some("DEFINE")));
    }

    #[test]
    fn missing_arguments_report_the_verb() {
        assert_eq!(parse("DEFINE en", false), Err(Some("DEFINE")));
        assert_eq!(parse("MATCH en prefix", false), Err(Some("MATCH")));
        assert_eq!(parse("SHOW INFO", false), Err(Some("SHOW")));
    }

    #[test]
    fn excess_arguments_report_the_verb() {
        assert_eq!(parse("DEFINE en cat dog", false), Err(Some("DEFINE")));
        assert_eq!(parse("SHOW DB extra", false), Err(Some("SHOW")));
    }

    #[test]
    fn unknown_verb_reports_none() {
        assert_eq!(parse("FROBNICATE en cat", false), Err(None));
    }

    #[test]
    fn control_garbage_reports_none() {
        assert_eq!(parse("\u{1}garbage", false), Err(None));
    }

    #[test]
    fn control_after_verb_reports_verb() {
        assert_eq!(parse("STATUS \u{1}", false), Err(Some("STATUS")));
        assert_eq!(parse("DEFINE en \u{1}x", false), Err(Some("DEFINE")));
    }

    #[test]
    fn match_full_form() {
        assert_eq!(
            parse_ok("MATCH en prefix th"),
            Command::Match {
                database: "en".to_string(),
                strategy: "prefix".to_string(),
                word: "th".to_string(),
            }
        );
    }

    #[test]
    fn show_variants() {
        assert_eq!(parse_ok("SHOW DB"), Command::Show(ShowParam::Databases));
        assert_eq!(parse_ok("SHOW DATABASES"), Command::Show(ShowParam::Databases));
        assert_eq!(parse_ok("SHOW STRAT"), Command::Show(ShowParam::Strategies));
        assert_eq!(parse_ok("SHOW STRATEGIES"), Command::Show(ShowParam::Strategies));
        assert_eq!(
            parse_ok("SHOW INFO en"),
            Command::Show(ShowParam::Info("en".to_string()))
        );
        assert_eq!(parse_ok("SHOW SERVER"), Command::Show(ShowParam::Server));
        assert_eq!(parse_ok("SHOW SERVER please"), Command::Show(ShowParam::Server));
        assert_eq!(parse("SHOW BOGUS", false), Err(Some("SHOW")));
    }

    #[test]
    fn client_preserves_inner_whitespace() {
        assert_eq!(
            parse_ok("CLIENT  foo   bar "),
            Command::Client("foo   bar".to_string())
        );
        assert_eq!(parse_ok("CLIENT"), Command::Client(String::new()));
    }

    #[test]
    fn simple_verbs_accept_trailing_text() {
        assert_eq!(parse_ok("STATUS"), Command::Status);
        assert_eq!(parse_ok("STATUS anything at all"), Command::Status);
        assert_eq!(parse_ok("HELP"), Command::Help);
        assert_eq!(parse_ok("QUIT now"), Command::Quit);
    }

    #[test]
    fn unimplemented_verbs_still_parse() {
        assert_eq!(parse_ok("OPTION MIME"), Command::Option);
        assert_eq!(parse_ok("AUTH user secret"), Command::Auth);
        assert_eq!(parse_ok("SASLAUTH blob"), Command::SaslAuth);
        assert_eq!(parse_ok("SASLRESP"), Command::SaslResp);
    }

    #[test]
    fn shortcuts_require_debug_mode() {
        assert_eq!(parse("D cat", false), Err(None));
        assert_eq!(parse("Q", false), Err(None));
        assert_eq!(parse("T 3 STATUS", false), Err(None));
    }

    #[test]
    fn define_shortcut() {
        assert_eq!(
            parse_debug("D cat"),
            Command::Define {
                database: "*".to_string(),
                word: "cat".to_string(),
            }
        );
        assert_eq!(
            parse_debug("D en cat"),
            Command::Define {
                database: "en".to_string(),
                word: "cat".to_string(),
            }
        );
    }

    #[test]
    fn match_shortcut() {
        assert_eq!(
            parse_debug("M cat"),
            Command::Match {
                database: "*".to_string(),
                strategy: ".".to_string(),
                word: "cat".to_string(),
            }
        );
        assert_eq!(
            parse_debug("M prefix cat"),
            Command::Match {
                database: "*".to_string(),
                strategy: "prefix".to_string(),
                word: "cat".to_string(),
            }
        );
        assert_eq!(
            parse_debug("M en exact cat"),
            Command::Match {
                database: "en".to_string(),
                strategy: "exact".to_string(),
                word: "cat".to_string(),
            }
        );
    }

    #[test]
    fn status_help_quit_shortcuts() {
        assert_eq!(parse_debug("S"), Command::Status);
        assert_eq!(parse_debug("h"), Command::Help);
        assert_eq!(parse_debug("Q"), Command::Quit);
    }

    #[test]
    fn time_command() {
        assert_eq!(
            parse_debug("T 3 STATUS"),
            Command::Time {
                count: 3,
                command: Box::new(Command::Status),
            }
        );
        assert_eq!(
            parse_debug("T 10"),
            Command::Time {
                count: 10,
                command: Box::new(Command::Empty),
            }
        );
    }

    #[test]
    fn time_command_does_not_nest() {
        assert_eq!(parse("T 3 T 2 HELP", true), Err(None));
    }

    #[test]
    fn time_command_requires_decimal() {
        assert_eq!(parse("T x HELP", true), Err(Some("T")));
        assert_eq!(parse("T", true), Err(Some("T")));
    }

    #[test]
    fn quoted_verb_matches_keyword() {
        assert_eq!(parse_ok("\"STATUS\""), Command::Status);
    }

    #[test]
    fn parse_never_panics_on_odd_input() {
        for line in &[
            "\\",
            "\"",
            "'",
            "DEFINE",
            "T 99999999999999999999 HELP",
            "M \u{7f}",
            "   \t  SHOW",
        ] {
            let _ = parse(line, true);
        }
    }
}
