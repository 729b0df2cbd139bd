mod common;

use camino::Utf8PathBuf;
use common::TemplateTree;
use ludou::TemplateError;

fn tree() -> TemplateTree {
    let tree = TemplateTree::new();
    tree.write("layouts/app.html", "<body>#yield('body')</body>");
    tree.write(
        "pages/home.ludou.html",
        "#extends['layouts.app']#section('body')home#endsection",
    );
    tree.write("partials/nav.html", "<nav></nav>");
    tree.write("broken.html", "#foreach($xs as $x)");
    tree.write("notes.txt", "#if( not a template");
    tree
}

fn paths(list: &[Utf8PathBuf]) -> Vec<&str> {
    list.iter().map(|p| p.as_str()).collect()
}

#[test]
fn reports_compiled_cached_and_failed() {
    let tree = tree();
    let engine = tree.engine();

    let report = engine.compile_all(&tree.root(), false);
    assert_eq!(report.total, 4);
    assert_eq!(
        paths(&report.compiled),
        vec!["layouts/app.html", "pages/home.ludou.html", "partials/nav.html"]
    );
    assert!(report.cached.is_empty());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].path, "broken.html");
    assert!(matches!(report.failed[0].error, TemplateError::Syntax(_)));

    let again = engine.compile_all(&tree.root(), false);
    assert!(again.compiled.is_empty());
    assert_eq!(again.cached.len(), 3);
    assert_eq!(again.failed.len(), 1);

    let forced = engine.compile_all(&tree.root(), true);
    assert_eq!(forced.compiled.len(), 3);
    assert!(forced.cached.is_empty());
}

#[test]
fn warmed_cache_serves_renders() {
    let tree = tree();
    let engine = tree.engine();
    engine.compile_all(&tree.root(), false);

    let outcome = engine.compile("pages.home").unwrap();
    assert_eq!(outcome.status, ludou::CompileStatus::Cached);
    let out = engine.render("pages.home", &ludou::Context::new()).unwrap();
    assert_eq!(out, "<body>home</body>");
}

#[test]
fn compile_path_uses_the_same_key_as_the_logical_name() {
    let tree = tree();
    let engine = tree.engine();
    let by_path = engine
        .compile_path(&tree.root().join("partials/nav.html"))
        .unwrap();
    let by_name = engine.compile("partials.nav").unwrap();
    assert_eq!(by_path.key, by_name.key);
    assert_eq!(by_name.status, ludou::CompileStatus::Cached);
}

#[test]
fn empty_or_missing_root() {
    let tree = TemplateTree::new();
    let engine = tree.engine();
    let report = engine.compile_all(&tree.root(), false);
    assert_eq!(report.total, 0);

    let report = engine.compile_all(&tree.root().join("missing"), false);
    assert_eq!(report.total, 0);
}

#[test]
fn hidden_and_ignore_listed_templates_are_compiled() {
    let tree = TemplateTree::new();
    tree.write(".drafts/post.html", "draft");
    tree.write("skipped.html", "listed in .ignore");
    tree.write(".ignore", "skipped.html\n.drafts/\n");
    let engine = tree.engine();

    let report = engine.compile_all(&tree.root(), false);
    assert_eq!(report.total, 2);
    assert_eq!(paths(&report.compiled), vec![".drafts/post.html", "skipped.html"]);
}
