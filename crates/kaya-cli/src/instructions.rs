//! Built-in system instructions handed to the model. Operators can replace
//! them wholesale through the secrets file.

use kaya_agent::ActionKind;

fn describe(kind: ActionKind) -> &'static str {
    match kind {
        ActionKind::Talk => "send conversational text; fields: text",
        ActionKind::None => "do nothing; use when no action is warranted",
        ActionKind::Status => "report agent state; fields: state, details",
        ActionKind::Error => {
            "report a problem; fields: error, details, missing_fields, suggested_fix"
        }
        ActionKind::Messenger => "message another chat; fields: to, message, mentions",
        ActionKind::Execute => "run a shell command; fields: command",
        ActionKind::Calculate => "evaluate arithmetic; fields: expression",
        ActionKind::WebSearch => "present search findings; fields: result",
        ActionKind::Contact => "look up contacts; fields: keywords",
        ActionKind::Read => "read a file; fields: path",
        ActionKind::Write => "write a file; fields: path, content",
        ActionKind::Delete => "delete a file or directory; fields: path",
        ActionKind::Copy => "copy a file or directory; fields: from, to",
        ActionKind::Move => "move or rename; fields: from, to",
        ActionKind::MakeDir => "create a directory; fields: path",
        ActionKind::Exists => "probe a path or list matches; fields: path, keywords",
        ActionKind::Download => "download a URL to a file; fields: url, path",
        ActionKind::Compress => {
            "create an archive; fields: path, destination, archive (zip|tar|7z|tgz)"
        }
        ActionKind::Decompress => "extract an archive; fields: path, destination",
        ActionKind::ArchiveList => "list archive contents; fields: path",
        ActionKind::FetchApi => "call an HTTP API; fields: method, url, headers, body",
        ActionKind::Shutdown => "stop the agent process; fields: reason",
        ActionKind::Restart => "restart the agent process; fields: reason",
    }
}

/// Renders the default system instructions for this deployment.
pub fn render_default_instructions(agent_name: &str, owner_name: &str) -> String {
    let mut catalog = String::new();
    for kind in ActionKind::ALL {
        catalog.push_str(&format!("- {}: {}\n", kind.as_str(), describe(*kind)));
    }

    format!(
        "You are {agent_name}, a personal agent operated by {owner_name}, reachable \
over chat messages.\n\
\n\
Respond ONLY with JSON inside a ```json fence: a single action object or an \
array of action objects, executed in order. Every object carries an \"action\" \
field naming one of:\n\
{catalog}\
\n\
When an action produces a result you receive it back as a returning_results \
message; continue with more actions or close with talk/none. Reference earlier \
results in the same array with #{{output}}, #{{output.N}} for element N, or \
#{{output.field}} for one field of the last result.\n\
\n\
If a request is missing required details, answer with an error action using \
code MISSING_INFORMATION and name the missing fields. If you cannot tell what \
the user wants, use AMBIGUOUS_INTENT. Never invent file paths, contacts, or \
command output."
    )
}

#[cfg(test)]
mod tests {
    use kaya_agent::ActionKind;

    use super::render_default_instructions;

    #[test]
    fn instructions_cover_every_action_kind() {
        let rendered = render_default_instructions("kaya", "Dana");
        for kind in ActionKind::ALL {
            assert!(
                rendered.contains(&format!("- {}:", kind.as_str())),
                "missing {}",
                kind.as_str()
            );
        }
        assert!(rendered.contains("```json"));
        assert!(rendered.contains("#{output}"));
    }
}
