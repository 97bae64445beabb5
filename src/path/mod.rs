//! Canonical addresses for every value reachable in a project.
//!
//! A `Path` names a value relative to one scope: the scope's root model (`$`),
//! a calculation output (`@name`) or a verification outcome (`?name`),
//! followed by attribute (`.field`) and table index (`[key]`) segments.
//! A `ProjectPath` pins a `Path` to its owning scope and renders as
//! `Scope::path`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use smallvec::SmallVec;
use std::fmt;
use std::str::FromStr;

mod parse;

pub use parse::{parse_path, parse_reference, PathSyntaxError};
pub(crate) use parse::{check_key_part, check_name};

pub const MODEL_ROOT: char = '$';
pub const CALC_PREFIX: char = '@';
pub const VERIFICATION_PREFIX: char = '?';
pub const SCOPE_SEPARATOR: &str = "::";

/// A table cell key: one enum variant per table dimension.
///
/// A variant may be any text without `]` or `,` and without surrounding
/// whitespace, so that every key renders into a parseable path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableKey(SmallVec<[String; 2]>);

impl TableKey {
    pub fn new<I, S>(parts: I) -> Result<Self, PathSyntaxError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let parts: SmallVec<[String; 2]> = parts.into_iter().map(Into::into).collect();
        if parts.is_empty() {
            return Err(PathSyntaxError::new("", 0, "empty table key"));
        }
        for part in &parts {
            check_key_part(part)?;
        }
        Ok(Self(parts))
    }

    pub fn single(variant: impl Into<String>) -> Result<Self, PathSyntaxError> {
        Self::new([variant])
    }

    /// Parses the bracket contents `a,b`, trimming each part.
    pub fn parse(text: &str) -> Result<Self, PathSyntaxError> {
        Self::new(text.split(',').map(str::trim))
    }

    /// For parts already known to be valid variants.
    pub(crate) fn from_variants(parts: impl IntoIterator<Item = String>) -> Self {
        Self(parts.into_iter().collect())
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }

    pub fn arity(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(","))
    }
}

impl FromStr for TableKey {
    type Err = PathSyntaxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TableKey::parse(s)
    }
}

impl TryFrom<&str> for TableKey {
    type Error = PathSyntaxError;

    fn try_from(text: &str) -> Result<Self, Self::Error> {
        TableKey::parse(text)
    }
}

/// The producer a path starts from.
///
/// Variant order matters: it is the node-kind rank used when ordering paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Root {
    Model,
    Calc(String),
    Verification(String),
}

impl fmt::Display for Root {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Root::Model => write!(f, "{}", MODEL_ROOT),
            Root::Calc(name) => write!(f, "{}{}", CALC_PREFIX, name),
            Root::Verification(name) => write!(f, "{}{}", VERIFICATION_PREFIX, name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    Attribute(String),
    Index(TableKey),
}

impl Segment {
    pub fn attr(name: impl Into<String>) -> Result<Self, PathSyntaxError> {
        let name = name.into();
        check_name(&name, "attribute name")?;
        Ok(Segment::Attribute(name))
    }

    pub fn index(key: TableKey) -> Self {
        Segment::Index(key)
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Attribute(name) => write!(f, ".{}", name),
            Segment::Index(key) => write!(f, "[{}]", key),
        }
    }
}

/// A scope-relative address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path {
    root: Root,
    segments: SmallVec<[Segment; 4]>,
}

impl Path {
    pub(crate) fn new(root: Root) -> Self {
        Self { root, segments: SmallVec::new() }
    }

    pub fn model() -> Self {
        Self::new(Root::Model)
    }

    pub fn calc(name: impl Into<String>) -> Result<Self, PathSyntaxError> {
        let name = name.into();
        check_name(&name, "calculation name")?;
        Ok(Self::new(Root::Calc(name)))
    }

    pub fn verification(name: impl Into<String>) -> Result<Self, PathSyntaxError> {
        let name = name.into();
        check_name(&name, "verification name")?;
        Ok(Self::new(Root::Verification(name)))
    }

    pub fn root(&self) -> &Root {
        &self.root
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// The path of the producer itself, with every segment dropped.
    pub fn producer(&self) -> Path {
        Path::new(self.root.clone())
    }

    pub fn join(&self, segment: Segment) -> Path {
        let mut next = self.clone();
        next.segments.push(segment);
        next
    }

    pub fn attr(&self, name: impl Into<String>) -> Result<Path, PathSyntaxError> {
        Ok(self.join(Segment::attr(name)?))
    }

    pub fn index(&self, key: TableKey) -> Path {
        self.join(Segment::index(key))
    }

    pub fn parent(&self) -> Option<Path> {
        if self.segments.is_empty() {
            return None;
        }
        let mut parent = self.clone();
        parent.segments.pop();
        Some(parent)
    }

    pub fn is_prefix_of(&self, other: &Path) -> bool {
        self.root == other.root
            && self.segments.len() <= other.segments.len()
            && self.segments.iter().zip(&other.segments).all(|(a, b)| a == b)
    }

    /// Pins this path to a scope.
    pub fn qualify(self, scope: impl Into<String>) -> Result<ProjectPath, PathSyntaxError> {
        ProjectPath::new(scope, self)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)?;
        for segment in &self.segments {
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}

impl FromStr for Path {
    type Err = PathSyntaxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_path(s)
    }
}

/// A `Path` owned by a named scope. Equality and hashing are structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProjectPath {
    scope: String,
    path: Path,
}

impl ProjectPath {
    pub fn new(scope: impl Into<String>, path: Path) -> Result<Self, PathSyntaxError> {
        let scope = scope.into();
        check_name(&scope, "scope name")?;
        Ok(Self { scope, path })
    }

    /// For a scope name that was validated when its scope was declared.
    pub(crate) fn in_scope(scope: impl Into<String>, path: Path) -> Self {
        Self { scope: scope.into(), path }
    }

    pub fn model(scope: impl Into<String>) -> Result<Self, PathSyntaxError> {
        Self::new(scope, Path::model())
    }

    pub fn calc(scope: impl Into<String>, name: impl Into<String>) -> Result<Self, PathSyntaxError> {
        Self::new(scope, Path::calc(name)?)
    }

    pub fn verification(scope: impl Into<String>, name: impl Into<String>) -> Result<Self, PathSyntaxError> {
        Self::new(scope, Path::verification(name)?)
    }

    /// Parses `Scope::path`. The scope qualifier is mandatory here.
    pub fn parse(text: &str) -> Result<Self, PathSyntaxError> {
        match parse_reference(text)? {
            (Some(scope), path) => Ok(Self { scope, path }),
            (None, _) => Err(PathSyntaxError::new(text, 0, "missing scope qualifier 'Scope::'")),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn root(&self) -> &Root {
        self.path.root()
    }

    pub fn segments(&self) -> &[Segment] {
        self.path.segments()
    }

    /// Address of the producing node (model, calculation or verification).
    pub fn producer(&self) -> ProjectPath {
        ProjectPath::in_scope(self.scope.clone(), self.path.producer())
    }

    pub fn join(&self, segment: Segment) -> ProjectPath {
        ProjectPath::in_scope(self.scope.clone(), self.path.join(segment))
    }

    pub fn is_prefix_of(&self, other: &ProjectPath) -> bool {
        self.scope == other.scope && self.path.is_prefix_of(&other.path)
    }

    /// Re-homes the same scope-relative path in another scope.
    pub fn with_scope(&self, scope: impl Into<String>) -> Result<ProjectPath, PathSyntaxError> {
        ProjectPath::new(scope, self.path.clone())
    }
}

impl fmt::Display for ProjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.scope, SCOPE_SEPARATOR, self.path)
    }
}

impl FromStr for ProjectPath {
    type Err = PathSyntaxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProjectPath::parse(s)
    }
}

impl Serialize for ProjectPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ProjectPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        ProjectPath::parse(&text).map_err(serde::de::Error::custom)
    }
}

impl Serialize for Path {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Path {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse_path(&text).map_err(serde::de::Error::custom)
    }
}

/// A declared reference as written: a path plus the optional `Scope::`
/// qualifier it carried.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    pub scope: Option<String>,
    pub path: Path,
}

impl Reference {
    pub fn parse(text: &str) -> Result<Self, PathSyntaxError> {
        let (scope, path) = parse_reference(text)?;
        Ok(Self { scope, path })
    }

    /// Pins the reference to its qualifier, or to `default_scope` when it
    /// has none.
    pub fn qualify(self, default_scope: &str) -> Result<ProjectPath, PathSyntaxError> {
        match self.scope {
            Some(scope) => Ok(ProjectPath::in_scope(scope, self.path)),
            None => ProjectPath::new(default_scope, self.path),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "{}{}{}", scope, SCOPE_SEPARATOR, self.path),
            None => write!(f, "{}", self.path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("$")]
    #[case("$.solar_panel_area")]
    #[case("$.design.battery_a.capacity")]
    #[case("$.power_consumption[nominal]")]
    #[case("$.peak[initial,nominal]")]
    #[case("$.t[low power]")]
    #[case("@calculate_solar_panel")]
    #[case("@calculate_solar_panel.heat_generated")]
    #[case("@margins[safe].value")]
    #[case("?power_budget")]
    #[case("?power_budget[mission]")]
    fn test_render_parse_round_trip(#[case] text: &str) {
        let path = parse_path(text).unwrap();
        assert_eq!(path.to_string(), text);
        assert_eq!(parse_path(&path.to_string()).unwrap(), path);

        let qualified = path.clone().qualify("Power").unwrap();
        assert_eq!(ProjectPath::parse(&qualified.to_string()).unwrap(), qualified);
    }

    #[test]
    fn test_constructed_paths_round_trip() {
        let path = Path::calc("thermal")
            .unwrap()
            .attr("panels")
            .unwrap()
            .index(TableKey::new(["cruise", "low power"]).unwrap())
            .attr("temperature")
            .unwrap()
            .qualify("Thermal")
            .unwrap();
        assert_eq!(path.to_string(), "Thermal::@thermal.panels[cruise,low power].temperature");
        assert_eq!(ProjectPath::parse(&path.to_string()).unwrap(), path);
    }

    #[rstest]
    #[case::comma_in_key(TableKey::single("a,b"))]
    #[case::bracket_in_key(TableKey::single("a]"))]
    #[case::padded_key(TableKey::single(" a"))]
    #[case::empty_key(TableKey::single(""))]
    #[case::no_parts(TableKey::new(Vec::<String>::new()))]
    fn test_unparseable_keys_are_rejected(#[case] key: Result<TableKey, PathSyntaxError>) {
        assert!(key.is_err());
    }

    #[rstest]
    #[case::dotted_calc(Path::calc("a.b").is_err())]
    #[case::empty_calc(Path::calc("").is_err())]
    #[case::spaced_verification(Path::verification("in limits").is_err())]
    #[case::bracketed_attr(Path::model().attr("x[0]").is_err())]
    #[case::qualified_scope(Path::model().qualify("Power::Sub").is_err())]
    #[case::spaced_scope(ProjectPath::model("Po wer").is_err())]
    fn test_unparseable_names_are_rejected(#[case] rejected: bool) {
        assert!(rejected);
    }

    #[test]
    fn test_prefix_relation() {
        let base = ProjectPath::calc("Power", "solar").unwrap();
        let leaf = base.join(Segment::attr("heat_generated").unwrap());

        assert!(base.is_prefix_of(&leaf));
        assert!(leaf.is_prefix_of(&leaf));
        assert!(!leaf.is_prefix_of(&base));
        assert!(!base.with_scope("Thermal").unwrap().is_prefix_of(&leaf));
        assert!(!Path::model().is_prefix_of(&Path::calc("solar").unwrap()));
        assert_eq!(leaf.producer(), base);
        assert_eq!(leaf.path().parent().unwrap(), *base.path());
    }

    #[test]
    fn test_ordering_is_total_and_structural() {
        let mut paths = vec![
            ProjectPath::verification("A", "v").unwrap(),
            ProjectPath::calc("A", "c").unwrap(),
            ProjectPath::model("B").unwrap(),
            ProjectPath::model("A").unwrap(),
        ];
        paths.sort();
        let rendered: Vec<String> = paths.iter().map(|p| p.to_string()).collect();
        assert_eq!(rendered, vec!["A::$", "A::@c", "A::?v", "B::$"]);
    }

    #[test]
    fn test_serde_uses_rendered_text() {
        let path = ProjectPath::parse("Power::@solar.heat_generated").unwrap();
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"Power::@solar.heat_generated\"");
        let back: ProjectPath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
    }

    #[test]
    fn test_reference_keeps_its_qualifier() {
        let r = Reference::parse("Power::@solar.heat_generated").unwrap();
        assert_eq!(r.scope.as_deref(), Some("Power"));
        assert_eq!(r.to_string(), "Power::@solar.heat_generated");
        assert_eq!(r.qualify("Thermal").unwrap().scope(), "Power");

        let local = Reference::parse("$.thermal_coefficient").unwrap();
        assert_eq!(local.qualify("Thermal").unwrap().to_string(), "Thermal::$.thermal_coefficient");
    }
}
