//! Inheritance resolution and artifact construction
//!
//! A template that `#extends` a layout contributes only its top-level
//! sections; the layout chain is walked child first until a template
//! without `#extends` is reached, and that template's nodes become the
//! artifact body. `#connect` partials are spliced in along the way.

use super::ast::{IfNode, Node, SectionNode};
use super::directive::DirectiveRegistry;
use super::error::{Result, TemplateSource};
use super::functions::Functions;
use super::optimize;
use super::parser::{self, ParsedTemplate};
use crate::loader::{Loader, TemplateFile};
use crate::types::TemplateNameRef;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Bumped whenever the serialized artifact layout changes
pub const ARTIFACT_VERSION: u32 = 1;

/// A modification time with a stable serialized form
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Mtime {
    pub secs: u64,
    pub nanos: u32,
}

impl From<SystemTime> for Mtime {
    fn from(time: SystemTime) -> Self {
        let since = time.duration_since(UNIX_EPOCH).unwrap_or_default();
        Self {
            secs: since.as_secs(),
            nanos: since.subsec_nanos(),
        }
    }
}

/// A file the artifact was built from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub path: Utf8PathBuf,
    pub modified: Mtime,
}

/// The executable form of a template, inheritance already resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledArtifact {
    pub version: u32,
    /// Logical name the artifact was compiled for
    pub name: String,
    /// Sections captured from templates that extend the body's layout,
    /// most-derived first
    pub sections: Vec<SectionNode>,
    /// Nodes of the root layout (or of the template itself if it does not extend)
    pub body: Vec<Node>,
    /// The template first, then its layouts and partials
    pub dependencies: Vec<Dependency>,
}

impl CompiledArtifact {
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Decode cached bytes. Anything unreadable or from another artifact
    /// version is `None`, which callers treat as a cache miss.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        match serde_json::from_slice::<Self>(bytes) {
            Ok(artifact) if artifact.version == ARTIFACT_VERSION => Some(artifact),
            Ok(artifact) => {
                tracing::debug!(
                    found = artifact.version,
                    expected = ARTIFACT_VERSION,
                    "ignoring artifact from another format version"
                );
                None
            }
            Err(e) => {
                tracing::debug!(error = %e, "ignoring undecodable artifact");
                None
            }
        }
    }

    /// Path of the template the artifact was compiled for
    pub fn template_path(&self) -> Option<&Utf8Path> {
        self.dependencies.first().map(|d| d.path.as_path())
    }

    /// Whether any recorded dependency changed or disappeared
    pub fn is_stale(&self, loader: &dyn Loader) -> bool {
        self.dependencies.iter().any(|dep| {
            match loader.modified(&dep.path) {
                Some(live) => Mtime::from(live) != dep.modified,
                None => true,
            }
        })
    }

    /// Run the optimizer over the body and the section overrides
    pub fn optimize(&mut self) {
        let (body, sections) = optimize::optimize_artifact(
            std::mem::take(&mut self.body),
            std::mem::take(&mut self.sections),
        );
        self.body = body;
        self.sections = sections;
    }
}

pub struct Compiler<'a> {
    loader: &'a dyn Loader,
    directives: &'a DirectiveRegistry,
    functions: &'a Functions,
}

impl<'a> Compiler<'a> {
    pub fn new(
        loader: &'a dyn Loader,
        directives: &'a DirectiveRegistry,
        functions: &'a Functions,
    ) -> Self {
        Self {
            loader,
            directives,
            functions,
        }
    }

    /// Compile a template and everything it inherits from or includes
    pub fn compile(&self, name: &TemplateNameRef) -> Result<CompiledArtifact> {
        let mut file = self.loader.load(name)?;
        let mut dependencies = Vec::new();
        let mut sections: Vec<SectionNode> = Vec::new();
        let mut chain: Vec<Utf8PathBuf> = Vec::new();

        loop {
            tracing::debug!(template = %file.name, path = %file.path, "compiling");
            chain.push(file.path.clone());
            dependencies.push(Dependency {
                path: file.path.clone(),
                modified: file.modified.into(),
            });

            let ParsedTemplate { extends, nodes } =
                parser::parse(&file.source, self.directives, self.functions)?;
            let mut includes = vec![file.path.clone()];
            let nodes = self.expand(nodes, &file.source, &mut includes, &mut dependencies)?;

            let Some((layout, range)) = extends else {
                return Ok(CompiledArtifact {
                    version: ARTIFACT_VERSION,
                    name: name.to_string(),
                    sections,
                    body: nodes,
                    dependencies,
                });
            };

            collect_sections(&file, nodes, &mut sections);

            let parent = self.loader.load(TemplateNameRef::from_str(&layout))?;
            if chain.contains(&parent.path) {
                return Err(file.source.syntax_error(
                    format!("circular `#extends`: `{layout}` is already in the layout chain"),
                    range,
                ));
            }
            file = parent;
        }
    }

    /// Replace `#connect` nodes with the partial's nodes, recursively
    fn expand(
        &self,
        nodes: Vec<Node>,
        source: &TemplateSource,
        includes: &mut Vec<Utf8PathBuf>,
        dependencies: &mut Vec<Dependency>,
    ) -> Result<Vec<Node>> {
        let mut out = Vec::with_capacity(nodes.len());
        for node in nodes {
            match node {
                Node::Connect(partial) => {
                    let file = self.loader.load(TemplateNameRef::from_str(&partial))?;
                    if includes.contains(&file.path) {
                        return Err(source.syntax_error(
                            format!("circular `#connect`: `{partial}` includes itself"),
                            locate(source, &partial),
                        ));
                    }
                    let parsed = parser::parse(&file.source, self.directives, self.functions)?;
                    if let Some((_, range)) = parsed.extends {
                        return Err(file
                            .source
                            .syntax_error("a partial cannot use `#extends`", range));
                    }
                    if !dependencies.iter().any(|d| d.path == file.path) {
                        dependencies.push(Dependency {
                            path: file.path.clone(),
                            modified: file.modified.into(),
                        });
                    }
                    includes.push(file.path.clone());
                    let expanded = self.expand(parsed.nodes, &file.source, includes, dependencies)?;
                    includes.pop();
                    out.extend(expanded);
                }
                Node::If(IfNode {
                    branches,
                    otherwise,
                }) => {
                    let mut resolved = Vec::with_capacity(branches.len());
                    for mut branch in branches {
                        branch.body = self.expand(branch.body, source, includes, dependencies)?;
                        resolved.push(branch);
                    }
                    let otherwise = match otherwise {
                        Some(body) => Some(self.expand(body, source, includes, dependencies)?),
                        None => None,
                    };
                    out.push(Node::If(IfNode {
                        branches: resolved,
                        otherwise,
                    }));
                }
                Node::Foreach(mut node) => {
                    node.body = self.expand(node.body, source, includes, dependencies)?;
                    out.push(Node::Foreach(node));
                }
                Node::Section(mut node) => {
                    node.body = self.expand(node.body, source, includes, dependencies)?;
                    out.push(Node::Section(node));
                }
                other => out.push(other),
            }
        }
        Ok(out)
    }
}

/// Keep the top-level sections of an extending template; everything else
/// it contains is unreachable from the layout
fn collect_sections(file: &TemplateFile, nodes: Vec<Node>, sections: &mut Vec<SectionNode>) {
    for node in nodes {
        match node {
            Node::Section(section) => {
                if sections.iter().any(|s| s.name == section.name) {
                    tracing::debug!(
                        template = %file.name,
                        section = %section.name,
                        "section already defined by a more derived template"
                    );
                }
                sections.push(section);
            }
            Node::Text(text) if text.trim().is_empty() => {}
            Node::Comment(_) => {}
            _ => {
                tracing::debug!(
                    template = %file.name,
                    "discarding content outside of sections in an extending template"
                );
            }
        }
    }
}

/// Best-effort span of `needle` in the source, for errors raised after parsing
fn locate(source: &TemplateSource, needle: &str) -> std::ops::Range<usize> {
    source
        .source
        .find(needle)
        .map(|start| start..start + needle.len())
        .unwrap_or(0..0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::InMemoryLoader;
    use crate::template::error::TemplateError;

    fn compile(loader: &InMemoryLoader, name: &str) -> Result<CompiledArtifact> {
        let directives = DirectiveRegistry::new();
        let functions = Functions::with_builtins();
        Compiler::new(loader, &directives, &functions).compile(TemplateNameRef::from_str(name))
    }

    #[test]
    fn test_sections_most_derived_first() {
        let loader = InMemoryLoader::new()
            .with("base", "<main>#yield('body')</main>")
            .with("mid", "#extends['base']#section body mid #endsection")
            .with("page", "#extends['mid'] ignored #section body page #endsection");

        let artifact = compile(&loader, "page").unwrap();
        let names: Vec<_> = artifact.sections.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["body", "body"]);
        assert_eq!(artifact.sections[0].body, vec![Node::Text(" page ".to_string())]);
        assert_eq!(artifact.dependencies.len(), 3);
        assert_eq!(artifact.template_path(), Some(Utf8Path::new("page")));
    }

    #[test]
    fn test_connect_is_inlined() {
        let loader = InMemoryLoader::new()
            .with("nav", "<nav>#[$title]</nav>")
            .with("page", "#if($show)#connect('nav')#endif");
        let artifact = compile(&loader, "page").unwrap();
        let Node::If(node) = &artifact.body[0] else {
            panic!("expected if");
        };
        assert_eq!(node.branches[0].body.len(), 3);
        assert_eq!(artifact.dependencies.len(), 2);
    }

    #[test]
    fn test_circular_includes() {
        let loader = InMemoryLoader::new()
            .with("a", "#connect('b')")
            .with("b", "#connect('a')");
        assert!(matches!(compile(&loader, "a"), Err(TemplateError::Syntax(_))));

        let loader = InMemoryLoader::new()
            .with("a", "#extends['b']")
            .with("b", "#extends['a']");
        let err = compile(&loader, "a").unwrap_err();
        assert!(err.to_string().contains("circular `#extends`"));
    }

    #[test]
    fn test_partial_cannot_extend() {
        let loader = InMemoryLoader::new()
            .with("base", "x")
            .with("partial", "#extends['base']")
            .with("page", "#connect('partial')");
        let err = compile(&loader, "page").unwrap_err();
        assert!(err.to_string().contains("cannot use `#extends`"));
    }

    #[test]
    fn test_missing_layout() {
        let loader = InMemoryLoader::new().with("page", "#extends['nope']");
        assert!(matches!(compile(&loader, "page"), Err(TemplateError::NotFound(_))));
    }

    #[test]
    fn test_staleness_and_encoding() {
        let loader = InMemoryLoader::new()
            .with("base", "#yield('body')")
            .with("page", "#extends['base']#section body x #endsection");
        let artifact = compile(&loader, "page").unwrap();
        assert!(!artifact.is_stale(&loader));

        let bytes = artifact.encode().unwrap();
        assert_eq!(CompiledArtifact::decode(&bytes), Some(artifact.clone()));
        assert_eq!(CompiledArtifact::decode(b"not an artifact"), None);

        loader.touch("base");
        assert!(artifact.is_stale(&loader));
    }
}
