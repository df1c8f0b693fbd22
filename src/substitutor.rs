use crate::command::{ExitCode, Stage};
use crate::env::Environment;
use crate::lexer::Token;

/// Resolves `$NAME` and `$?` words of one stage into plain arguments.
///
/// Only a word that *starts* with `$` is expanded, and only when it was not
/// single-quoted. `$?` becomes `last_exit_code`; any other name is looked up in
/// `env` and expands to the empty string when unset.
pub fn substitute(stage: &[Token], last_exit_code: ExitCode, env: &Environment) -> Stage {
    stage
        .iter()
        .map(|token| resolve(token, last_exit_code, env))
        .collect()
}

fn resolve(token: &Token, last_exit_code: ExitCode, env: &Environment) -> String {
    if !token.substitutable {
        return token.value.clone();
    }
    match token.value.strip_prefix('$') {
        Some("?") => last_exit_code.to_string(),
        // A bare `$` names nothing.
        Some("") | None => token.value.clone(),
        Some(name) => env.get(name),
    }
}
