//! Robots.txt parsing and rule evaluation
//!
//! Tokenizing is done by the `robotstxt` crate, which handles byte-order
//! marks, comments, misspelled keys and percent-escaping of rule values.
//! Parsing never fails: unknown keys and unparsable crawl-delays are skipped.

use robotstxt::{parse_robotstxt, RobotsParseHandler};

/// Whether a rule permits or forbids matching paths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Allow,
    Disallow,
}

/// A single `Allow`/`Disallow` directive
///
/// Patterns are percent-escaped path prefixes. `*` matches any run of
/// characters and a trailing `$` anchors the pattern to the end of the path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRule {
    pub kind: RuleKind,
    pub pattern: String,
}

impl PathRule {
    /// Checks whether this rule applies to `path`
    pub fn matches(&self, path: &str) -> bool {
        pattern_matches(&self.pattern, path)
    }

    /// Rule specificity; longer patterns win
    pub fn specificity(&self) -> usize {
        self.pattern.len()
    }
}

impl std::fmt::Display for PathRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            RuleKind::Allow => write!(f, "Allow: {}", self.pattern),
            RuleKind::Disallow => write!(f, "Disallow: {}", self.pattern),
        }
    }
}

/// Rules that apply to one set of `User-agent` lines
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentGroup {
    /// Lowercased agent tokens; `*` is the catch-all group
    pub agents: Vec<String>,
    pub rules: Vec<PathRule>,
    pub crawl_delay: Option<f64>,
}

/// Result of evaluating a path against a policy
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub allowed: bool,
    /// The rule that decided, if any rule matched
    pub rule: Option<PathRule>,
    /// The agent token of the group that was consulted
    pub group: Option<String>,
}

/// Builds agent groups from the parser's callbacks
#[derive(Default)]
struct GroupCollector {
    groups: Vec<AgentGroup>,
    sitemaps: Vec<String>,
    current: Option<AgentGroup>,
    // Consecutive User-agent lines share one group
    collecting_agents: bool,
}

impl GroupCollector {
    fn push_rule(&mut self, line_num: u32, kind: RuleKind, value: &str) {
        self.collecting_agents = false;
        let Some(group) = self.current.as_mut() else {
            tracing::trace!("Ignoring rule outside any group on line {}", line_num);
            return;
        };
        // An empty Disallow allows everything, an empty Allow says nothing
        if value.is_empty() {
            return;
        }
        group.rules.push(PathRule {
            kind,
            pattern: normalize_pattern(value),
        });
    }

    fn finish(mut self) -> RobotsPolicy {
        self.groups.extend(self.current.take());
        RobotsPolicy {
            groups: self.groups,
            sitemaps: self.sitemaps,
        }
    }
}

impl RobotsParseHandler for GroupCollector {
    fn handle_robots_start(&mut self) {}

    fn handle_robots_end(&mut self) {}

    fn handle_user_agent(&mut self, _line_num: u32, user_agent: &str) {
        if !self.collecting_agents {
            self.groups.extend(self.current.take());
            self.current = Some(AgentGroup::default());
        }
        self.collecting_agents = true;
        if let Some(group) = self.current.as_mut() {
            group.agents.push(user_agent.trim().to_lowercase());
        }
    }

    fn handle_allow(&mut self, line_num: u32, value: &str) {
        self.push_rule(line_num, RuleKind::Allow, value.trim());
    }

    fn handle_disallow(&mut self, line_num: u32, value: &str) {
        self.push_rule(line_num, RuleKind::Disallow, value.trim());
    }

    fn handle_sitemap(&mut self, _line_num: u32, value: &str) {
        self.sitemaps.push(value.trim().to_string());
    }

    fn handle_unknown_action(&mut self, line_num: u32, action: &str, value: &str) {
        if !action.trim().eq_ignore_ascii_case("crawl-delay") {
            return;
        }
        self.collecting_agents = false;
        let value = value.trim();
        match (self.current.as_mut(), value.parse::<f64>()) {
            (Some(group), Ok(delay)) if delay.is_finite() && delay >= 0.0 => {
                group.crawl_delay = Some(delay);
            }
            _ => tracing::trace!("Ignoring crawl-delay '{}' on line {}", value, line_num),
        }
    }
}

/// A parsed robots.txt file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RobotsPolicy {
    groups: Vec<AgentGroup>,
    sitemaps: Vec<String>,
}

impl RobotsPolicy {
    /// Parses robots.txt content
    pub fn parse(content: &str) -> Self {
        let mut collector = GroupCollector::default();
        parse_robotstxt(content.trim_start_matches('\u{feff}'), &mut collector);
        collector.finish()
    }

    /// A policy with no rules: every path is allowed
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// A policy that forbids every path for every agent
    pub fn deny_all() -> Self {
        Self {
            groups: vec![AgentGroup {
                agents: vec!["*".to_string()],
                rules: vec![PathRule {
                    kind: RuleKind::Disallow,
                    pattern: "/".to_string(),
                }],
                crawl_delay: None,
            }],
            sitemaps: Vec::new(),
        }
    }

    pub fn groups(&self) -> &[AgentGroup] {
        &self.groups
    }

    pub fn sitemaps(&self) -> &[String] {
        &self.sitemaps
    }

    /// Checks if a path is allowed for the given user agent
    pub fn is_allowed(&self, path: &str, user_agent: &str) -> bool {
        self.evaluate(path, user_agent).allowed
    }

    /// Evaluates a path and reports which rule decided
    ///
    /// Only the most specific matching group tier is consulted. Among its
    /// rules the longest matching pattern wins, and `Allow` wins a tie.
    pub fn evaluate(&self, path: &str, user_agent: &str) -> Verdict {
        let path = escape_path(path);
        let (group, rules) = self.rules_for(user_agent);

        let decisive = rules
            .into_iter()
            .filter(|rule| rule.matches(&path))
            .max_by_key(|rule| (rule.specificity(), rule.kind == RuleKind::Allow));

        Verdict {
            allowed: decisive.map_or(true, |rule| rule.kind == RuleKind::Allow),
            rule: decisive.cloned(),
            group,
        }
    }

    /// Gets the crawl delay for a specific user agent
    ///
    /// A delay in the agent's own group takes precedence over the `*` group.
    pub fn crawl_delay(&self, user_agent: &str) -> Option<f64> {
        let token = product_token(user_agent);
        let specific = self
            .groups
            .iter()
            .filter_map(|g| agent_match_len(g, &token).filter(|len| *len > 0).map(|len| (len, g)))
            .filter(|(_, g)| g.crawl_delay.is_some())
            .max_by_key(|(len, _)| *len)
            .and_then(|(_, g)| g.crawl_delay);

        specific.or_else(|| {
            self.groups
                .iter()
                .filter(|g| g.agents.iter().any(|a| a == "*"))
                .find_map(|g| g.crawl_delay)
        })
    }

    /// Collects the rules of the best-matching group tier
    ///
    /// Groups naming the same agent are merged, as crawlers commonly do.
    fn rules_for(&self, user_agent: &str) -> (Option<String>, Vec<&PathRule>) {
        let token = product_token(user_agent);
        let best = self
            .groups
            .iter()
            .filter_map(|g| agent_match_len(g, &token))
            .max();

        let Some(best) = best else {
            return (None, Vec::new());
        };

        let mut group_name = None;
        let mut rules = Vec::new();
        for group in &self.groups {
            if agent_match_len(group, &token) == Some(best) {
                if group_name.is_none() {
                    group_name = group
                        .agents
                        .iter()
                        .find(|a| agent_len(a, &token) == Some(best))
                        .cloned();
                }
                rules.extend(group.rules.iter());
            }
        }
        (group_name, rules)
    }
}

/// Extracts the lowercase product token (`"Foo/1.2 (...)"` becomes `"foo"`)
pub fn product_token(user_agent: &str) -> String {
    user_agent
        .split(|c: char| c == '/' || c.is_whitespace())
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

/// Match strength of an agent line: `*` is 0, named agents their length
fn agent_len(agent: &str, token: &str) -> Option<usize> {
    if agent == "*" {
        Some(0)
    } else if !agent.is_empty() && token.contains(agent) {
        Some(agent.len())
    } else {
        None
    }
}

fn agent_match_len(group: &AgentGroup, token: &str) -> Option<usize> {
    group.agents.iter().filter_map(|a| agent_len(a, token)).max()
}

/// Percent-escapes a request path the way rule values are escaped
///
/// Paths taken from a parsed `Url` are already escaped and pass through.
fn escape_path(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    if path.is_ascii() {
        return path.to_string();
    }
    match url::Url::parse("http://robots.invalid/").and_then(|base| base.join(path)) {
        Ok(joined) => crate::url::policy_path(&joined),
        Err(_) => path.to_string(),
    }
}

/// Collapses trailing wildcards, which add nothing to a prefix match
fn normalize_pattern(value: &str) -> String {
    let anchored = value.ends_with('$');
    let body = value.trim_end_matches('$');
    let body = if anchored { body } else { body.trim_end_matches('*') };
    let mut pattern = if body.starts_with('/') || body.starts_with('*') {
        body.to_string()
    } else {
        format!("/{}", body)
    };
    if anchored {
        pattern.push('$');
    }
    pattern
}

/// Prefix match with `*` wildcards and an optional trailing `$` anchor
fn pattern_matches(pattern: &str, path: &str) -> bool {
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(p) => (p, true),
        None => (pattern, false),
    };

    let mut pieces = pattern.split('*');
    let first = pieces.next().unwrap_or_default();
    let Some(mut rest) = path.strip_prefix(first) else {
        return false;
    };

    let pieces: Vec<&str> = pieces.collect();
    if pieces.is_empty() {
        return !anchored || rest.is_empty();
    }

    for (i, piece) in pieces.iter().enumerate() {
        if anchored && i == pieces.len() - 1 {
            return rest.ends_with(piece);
        }
        match rest.find(piece) {
            Some(idx) => rest = &rest[idx + piece.len()..],
            None => return false,
        }
    }
    true
}
