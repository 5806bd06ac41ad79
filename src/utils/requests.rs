//! Request helpers: endpoint access matching and path inspection

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::config::{EndpointMethod, EndpointMethods};

/// Path parameters recognised in STAC collection and item routes
static PATH_VARIABLES_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^/collections/(?P<collection_id>[^/]+)(?:/(?:items|bulk_items)(?:/(?P<item_id>[^/]+))?)?/?$",
    )
    .unwrap()
});

/// Access requirements for a single request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub is_private: bool,
    pub required_scopes: Vec<String>,
}

#[derive(Debug, Clone)]
struct EndpointRule {
    pattern: Regex,
    methods: Vec<EndpointMethod>,
}

/// A compiled endpoint table, evaluated in declaration order
#[derive(Debug, Clone, Default)]
pub struct EndpointTable {
    rules: Vec<EndpointRule>,
}

impl EndpointTable {
    /// Compile the table's patterns; patterns only anchor at the start of the path
    pub fn compile(endpoints: &EndpointMethods) -> Result<Self, regex::Error> {
        let rules = endpoints
            .iter()
            .map(|(pattern, methods)| {
                Ok(EndpointRule {
                    pattern: Regex::new(&format!("^(?:{})", pattern))?,
                    methods: methods.clone(),
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { rules })
    }

    /// Scopes of the first rule covering the path and method
    pub fn find(&self, path: &str, method: &str) -> Option<Vec<String>> {
        self.rules
            .iter()
            .filter(|rule| rule.pattern.is_match(path))
            .flat_map(|rule| rule.methods.iter())
            .find(|candidate| candidate.method().eq_ignore_ascii_case(method))
            .map(EndpointMethod::scopes)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Decide whether a request is private and which scopes it needs
pub fn find_match(
    path: &str,
    method: &str,
    private_endpoints: &EndpointTable,
    public_endpoints: &EndpointTable,
    default_public: bool,
) -> MatchResult {
    let primary = if default_public {
        private_endpoints
    } else {
        public_endpoints
    };

    if let Some(required_scopes) = primary.find(path, method) {
        return MatchResult {
            is_private: default_public,
            required_scopes,
        };
    }

    if default_public {
        return MatchResult {
            is_private: false,
            required_scopes: Vec::new(),
        };
    }

    MatchResult {
        is_private: true,
        required_scopes: private_endpoints.find(path, method).unwrap_or_default(),
    }
}

/// Both endpoint tables plus the default policy
#[derive(Debug, Clone)]
pub struct EndpointRules {
    private_endpoints: EndpointTable,
    public_endpoints: EndpointTable,
    default_public: bool,
}

impl EndpointRules {
    pub fn new(
        private_endpoints: &EndpointMethods,
        public_endpoints: &EndpointMethods,
        default_public: bool,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            private_endpoints: EndpointTable::compile(private_endpoints)?,
            public_endpoints: EndpointTable::compile(public_endpoints)?,
            default_public,
        })
    }

    pub fn find_match(&self, path: &str, method: &str) -> MatchResult {
        find_match(
            path,
            method,
            &self.private_endpoints,
            &self.public_endpoints,
            self.default_public,
        )
    }
}

/// Extract `collection_id` and `item_id` from a STAC path
pub fn extract_variables(path: &str) -> IndexMap<String, String> {
    let mut variables = IndexMap::new();
    if let Some(captures) = PATH_VARIABLES_REGEX.captures(path) {
        for name in ["collection_id", "item_id"] {
            if let Some(value) = captures.name(name) {
                variables.insert(name.to_string(), value.as_str().to_string());
            }
        }
    }
    variables
}

/// Look up a dotted path such as `req.headers.authorization`
pub fn value_by_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(value, |current, segment| current.get(segment))
}
