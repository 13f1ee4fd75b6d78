//! Built-in strategy for GitHub awesome lists and repository READMEs.

use crate::models::{Source, SourceType};

/// Strategy id recorded for sources handled by [`AWESOME_LIST_STRATEGY`].
pub const AWESOME_LIST_STRATEGY_ID: &str = "builtin-awesome-list";

/// Extracts `[name](url) - description` entries from markdown lists and
/// `| [name](url) | description |` table rows.
pub const AWESOME_LIST_STRATEGY: &str = r#"
fn clean(text) {
    let t = regex_replace(text, "^[\\s:|—–-]+", "");
    regex_replace(t, "[\\s|]+$", "")
}

fn tags_for(text) {
    let categories = #{
        library: ["library", "sdk", "framework"],
        cli: ["cli", "command line", "terminal"],
        api: ["api", "endpoint"],
        plugin: ["plugin", "extension"],
        rag: ["rag", "retrieval"],
        embedding: ["embedding", "vector"],
        search: ["search", "query"],
        agent: ["agent", "autonomous"],
        database: ["database", "sql", "postgres", "sqlite"]
    };
    let lower = text;
    lower.make_lower();
    let tags = [];
    for tag in categories.keys() {
        for word in categories[tag] {
            if lower.contains(word) {
                tags.push(tag);
                break;
            }
        }
    }
    tags
}

fn extract_tools(html) {
    let tools = [];
    let seen = #{};
    for line in lines(html) {
        let caps = regex_captures(line, "^\\s*[-*+]\\s*\\[([^\\]]+)\\]\\(([^)\\s]+)\\)(.*)$");
        if caps.is_empty() {
            caps = regex_captures(line, "^\\s*\\|\\s*\\[([^\\]]+)\\]\\(([^)\\s]+)\\)\\s*\\|\\s*([^|]*)");
        }
        if caps.is_empty() {
            continue;
        }
        let groups = caps[0];
        let name = groups[1];
        name.trim();
        let url = groups[2];
        url.trim();
        if name == "" || !url.starts_with("http") || seen.contains(url) {
            continue;
        }
        seen[url] = true;
        let description = clean(groups[3]);
        if description == "" {
            description = name;
        }
        tools.push(#{
            name: name,
            description: description,
            url: url,
            tags: tags_for(name + " " + description)
        });
    }
    tools
}
"#;

/// URLs to try, in order, when fetching the document for `source`.
///
/// GitHub list and repository sources are read from the raw README on the
/// `main` branch, then `master`. Everything else is fetched as-is.
pub fn document_urls(source: &Source) -> Vec<String> {
    let is_github = matches!(
        source.source_type,
        SourceType::GithubAwesomeList | SourceType::GithubRepository
    );
    if is_github {
        if let Some((owner, repo)) = github_repo(&source.url) {
            return ["main", "master"]
                .iter()
                .map(|branch| {
                    format!("https://raw.githubusercontent.com/{owner}/{repo}/{branch}/README.md")
                })
                .collect();
        }
    }
    vec![source.url.clone()]
}

/// `(owner, repo)` from a `github.com/<owner>/<repo>` URL.
pub fn github_repo(url: &str) -> Option<(String, String)> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    if host != "github.com" && host != "www.github.com" {
        return None;
    }
    let mut segments = parsed.path_segments()?.filter(|s| !s.is_empty());
    let owner = segments.next()?.to_string();
    let repo = segments.next()?.trim_end_matches(".git").to_string();
    Some((owner, repo))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_github_repo() {
        assert_eq!(
            github_repo("https://github.com/punkpeye/awesome-mcp-servers"),
            Some(("punkpeye".into(), "awesome-mcp-servers".into()))
        );
        assert_eq!(
            github_repo("https://github.com/a/b.git/"),
            Some(("a".into(), "b".into()))
        );
        assert_eq!(github_repo("https://github.com/only-owner"), None);
        assert_eq!(github_repo("https://gitlab.com/a/b"), None);
    }

    #[test]
    fn test_document_urls_for_github_list() {
        let source = Source::new(
            "https://github.com/acme/awesome-mcp",
            "list",
            SourceType::GithubAwesomeList,
        );
        assert_eq!(
            document_urls(&source),
            vec![
                "https://raw.githubusercontent.com/acme/awesome-mcp/main/README.md".to_string(),
                "https://raw.githubusercontent.com/acme/awesome-mcp/master/README.md".to_string(),
            ]
        );
    }

    #[test]
    fn test_document_urls_for_website() {
        let source = Source::new("https://mcp.so/servers", "site", SourceType::Website);
        assert_eq!(document_urls(&source), vec!["https://mcp.so/servers".to_string()]);
    }
}
