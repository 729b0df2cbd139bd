mod common;

use common::{TemplateTree, memory_engine, memory_engine_with};
use indoc::indoc;
use ludou::{Context, Engine, EngineConfig, TemplateError};
use serde_json::json;

fn tree() -> TemplateTree {
    let tree = TemplateTree::new();
    tree.write(
        "layouts/app.html",
        "<html><title>#yield('title', 'Site')</title><body>#yield('body')</body></html>",
    );
    tree.write(
        "pages/home.html",
        indoc! {"
            #extends['layouts.app']
            this text is outside every section
            #section body
            <p>Hi #[$name]</p>
            #endsection
        "},
    );
    tree
}

#[test]
fn child_sections_fill_layout_yields() {
    let tree = tree();
    let engine = tree.engine();
    let out = engine.render_json("pages.home", json!({"name": "Ana"})).unwrap();

    assert!(out.starts_with("<html><title>Site</title><body>"), "{out}");
    assert!(out.trim_end().ends_with("</body></html>"), "{out}");
    assert!(out.contains("<p>Hi Ana</p>"));
    assert!(!out.contains("outside"));
}

#[test]
fn most_derived_section_wins() {
    let fx = memory_engine(&[
        (
            "base",
            "[#yield('title', 'B')|#section nav default-nav #endsection|#yield('body')]",
        ),
        (
            "mid",
            "#extends['base']#section('title')Mid#endsection#section('body')mid-body#endsection",
        ),
        ("page", "#extends['mid']#section('title')Page#endsection"),
        (
            "menu",
            "#extends['base']#section('nav')custom-nav#endsection",
        ),
    ]);
    let ctx = Context::new();
    assert_eq!(fx.engine.render("page", &ctx).unwrap(), "[Page| default-nav |mid-body]");
    assert_eq!(fx.engine.render("mid", &ctx).unwrap(), "[Mid| default-nav |mid-body]");
    assert_eq!(fx.engine.render("menu", &ctx).unwrap(), "[B|custom-nav|]");
    assert_eq!(fx.engine.render("base", &ctx).unwrap(), "[B| default-nav |]");
}

#[test]
fn yield_default_is_escaped() {
    let fx = memory_engine(&[("layout", "#yield('title', '<T>')")]);
    assert_eq!(fx.engine.render("layout", &Context::new()).unwrap(), "&lt;T&gt;");
}

#[test]
fn sections_see_the_render_context() {
    let fx = memory_engine(&[
        ("layout", "#foreach($xs as $x)#yield('row')#endforeach"),
        ("list", "#extends['layout']#section('row')<#[$x]>#endsection"),
    ]);
    let out = fx.engine.render_json("list", json!({"xs": [1, 2]})).unwrap();
    assert_eq!(out, "<1><2>");
}

#[test]
fn connect_inlines_partials() {
    let fx = memory_engine(&[
        ("partials.nav", "<nav>#[$who]</nav>"),
        ("page", "#connect('partials.nav')|#connect('partials.nav')"),
        ("loop.a", "#connect('loop.b')"),
        ("loop.b", "#connect('loop.a')"),
        ("bad", "#connect('page.with.layout')"),
        ("page.with.layout", "#extends['partials.nav']"),
    ]);
    let out = fx.engine.render_json("page", json!({"who": "me"})).unwrap();
    assert_eq!(out, "<nav>me</nav>|<nav>me</nav>");

    let err = fx.engine.render("loop.a", &Context::new()).unwrap_err();
    assert!(matches!(err, TemplateError::Syntax(ref e) if e.message.contains("circular")));
    let err = fx.engine.render("bad", &Context::new()).unwrap_err();
    assert!(matches!(err, TemplateError::Syntax(ref e) if e.message.contains("partial")));
}

#[test]
fn circular_extends_is_an_error() {
    let fx = memory_engine(&[("a", "#extends['b']"), ("b", "#extends['a']")]);
    let err = fx.engine.render("a", &Context::new()).unwrap_err();
    assert!(matches!(err, TemplateError::Syntax(ref e) if e.message.contains("circular")));
}

#[test]
fn missing_layout_is_not_found() {
    let fx = memory_engine(&[("page", "#extends['nope']")]);
    assert!(matches!(
        fx.engine.render("page", &Context::new()),
        Err(TemplateError::NotFound(_))
    ));
}

#[test]
fn layout_changes_invalidate_children() {
    let fx = memory_engine(&[
        ("layout", "A:#yield('body')"),
        ("page", "#extends['layout']#section('body')x#endsection"),
    ]);
    let ctx = Context::new();
    assert_eq!(fx.engine.render("page", &ctx).unwrap(), "A:x");
    fx.loader.set("layout", "B:#yield('body')");
    assert_eq!(fx.engine.render("page", &ctx).unwrap(), "B:x");
}

#[test]
fn extends_must_come_first() {
    let fx = memory_engine_with(
        EngineConfig::new(),
        &[("page", "#[$x]#extends['layout']"), ("layout", "")],
    );
    let err = fx.engine.render("page", &Context::new()).unwrap_err();
    assert!(matches!(err, TemplateError::Syntax(ref e) if e.message.contains("first directive")));
}

#[test]
fn namespaces_and_paths() {
    let tree = tree();
    tree.write("admin/users/index.html", "admin #[$n]");
    let engine = Engine::new(tree.config().with_namespace("admin", tree.root().join("admin"))).unwrap();

    let out = engine.render_json("admin::users.index", json!({"n": 1})).unwrap();
    assert_eq!(out, "admin 1");

    let path = tree.root().join("admin/users/index.html");
    let out = engine.render_json(path.as_str(), json!({"n": 2})).unwrap();
    assert_eq!(out, "admin 2");
}

fn render_both(templates: &[(&str, &str)], name: &str, data: serde_json::Value) -> (String, String) {
    let plain = memory_engine_with(EngineConfig::new().with_optimize(false), templates);
    let optimized = memory_engine_with(EngineConfig::new().with_optimize(true), templates);
    (
        plain.engine.render_json(name, data.clone()).unwrap(),
        optimized.engine.render_json(name, data).unwrap(),
    )
}

#[test]
fn sections_yielded_into_pre_keep_whitespace() {
    let (plain, optimized) = render_both(
        &[
            ("layout", "<pre>#yield('code')</pre>\n<p>#yield('note')</p>"),
            (
                "page",
                "#extends['layout']#section('code')a    b\n\n   c#endsection#section('note')x    y#endsection",
            ),
        ],
        "page",
        json!({}),
    );
    assert_eq!(plain, "<pre>a    b\n\n   c</pre>\n<p>x    y</p>");
    assert_eq!(optimized, "<pre>a    b\n\n   c</pre>\n<p>x y</p>");
}

#[test]
fn section_opening_a_raw_element_is_respected() {
    let (plain, optimized) = render_both(
        &[
            ("layout", "<div>#yield('open')  keep    this </pre>  </div>"),
            ("page", "#extends['layout']#section('open')<pre>#endsection"),
        ],
        "page",
        json!({}),
    );
    assert_eq!(optimized, plain);
}

#[test]
fn branches_that_open_raw_elements_are_respected() {
    let templates = [(
        "t",
        "#if($open)<pre>#endif  a    b  #if($open)</pre>#endif\n#foreach($rows as $r)<textarea>#[$r]#endforeach  x   y",
    )];
    for open in [true, false] {
        let data = json!({"open": open, "rows": ["1"]});
        let (plain, optimized) = render_both(&templates, "t", data);
        assert_eq!(optimized, plain);
    }
}
