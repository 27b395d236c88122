use super::*;

fn load(text: &str) -> Result<Definitions> {
    Definitions::load_str(text, Utf8Path::new("/cfg"))
}

fn load_err(text: &str) -> String {
    format!("{:#}", load(text).unwrap_err())
}

/// A scratch directory for tests that need real files on disk
fn scratch_dir(test: &str) -> Utf8PathBuf {
    let dir = Utf8PathBuf::try_from(std::env::temp_dir())
        .unwrap()
        .join(format!("rigging-config-{}-{test}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn simple_definitions() {
    let defs = load(
        r#"
        Greeting = "hello";
        Count = 3;
        Ratio = 0.5;
        Flag = true;
        "#,
    )
    .unwrap();
    assert_eq!(defs.len(), 4);
    assert_eq!(defs.get("Greeting"), Some(&Expr::Str("hello".into())));
    assert_eq!(defs.get("Count"), Some(&Expr::Int(3)));
    assert_eq!(defs.get("Ratio"), Some(&Expr::Real(0.5)));
    assert_eq!(defs.get("Flag"), Some(&Expr::Bool(true)));
}

#[test]
fn comments_and_blank_lines() {
    let defs = load(
        r#"
        ! leading comment

        A = 1;
        ! interleaved comment
        B = 2;
        "#,
    )
    .unwrap();
    assert_eq!(defs.len(), 2);
}

#[test]
fn multi_line_definition() {
    let defs = load(
        r#"
        Items = List(
            1,
            2,
            3);
        "#,
    )
    .unwrap();
    assert_eq!(
        defs.get("Items"),
        Some(&Expr::List(vec![Expr::Int(1), Expr::Int(2), Expr::Int(3)]))
    );
}

#[test]
fn comment_inside_multi_line_definition() {
    let defs = load(
        r#"
        Items = List(1,
        ! values continue below
            2);
        "#,
    )
    .unwrap();
    assert_eq!(
        defs.get("Items"),
        Some(&Expr::List(vec![Expr::Int(1), Expr::Int(2)]))
    );
}

#[test]
fn unterminated_definition() {
    assert!(load("A = List(1, 2)").unwrap_err().to_string().contains("End of file"));
}

#[test]
fn directive_inside_definition() {
    let err = load_err("A = List(1,\n#define X \"y\"\n2);");
    assert!(err.contains("after A = List(1,"), "{err}");
}

#[test]
fn redefinition_is_rejected() {
    let err = load_err("A = 1;\nA = 2;");
    assert!(err.contains("Redefinition of A"), "{err}");
}

#[test]
fn reserved_words_are_rejected() {
    for word in ["List", "Concat", "true", "newline"] {
        let err = load_err(&format!("{word} = 1;"));
        assert!(err.contains("reserved word"), "{word}: {err}");
    }
}

#[test]
fn invalid_names_are_rejected() {
    assert!(load_err("2x = 1;").contains("Invalid syntax"));
    assert!(load_err("_x = 1;").contains("Invalid syntax"));
}

#[test]
fn parse_errors_carry_the_definition_context() {
    let err = load_err(r#"Bad = Library("a", "b");"#);
    assert!(err.contains("exactly one parameter"), "{err}");
    assert!(err.contains("defining Bad"), "{err}");
}

#[test]
fn shebang_only_on_first_line() {
    assert!(load("#!/usr/bin/env rigging\nA = 1;").is_ok());
    assert!(load_err("A = 1;\n#!/usr/bin/env rigging").contains("shebang"));
}

#[test]
fn macros_expand_in_definitions() {
    let defs = load(
        r#"
        #define Name "world"
        Greeting = "$(Name)";
        "#,
    )
    .unwrap();
    assert_eq!(defs.get("Greeting"), Some(&Expr::Str("world".into())));
}

#[test]
fn macros_expand_recursively() {
    let defs = load(
        r#"
        #define Base "lib"
        #define Full "$(Base)x.so"
        Path = "$(Full)";
        "#,
    )
    .unwrap();
    assert_eq!(defs.get("Path"), Some(&Expr::Str("libx.so".into())));
}

#[test]
fn current_dir_macro_and_expression() {
    let defs = load(
        r#"
        FromMacro = "$(CurrentDir)data";
        FromExpr = CurrentDir();
        "#,
    )
    .unwrap();
    assert_eq!(defs.get("FromMacro"), Some(&Expr::Str("/cfg/data".into())));
    assert_eq!(defs.get("FromExpr"), Some(&Expr::Str("/cfg/".into())));
}

#[test]
fn undefined_macro() {
    assert!(load_err("A = \"$(Missing)\";").contains("Undefined macro Missing"));
}

#[test]
fn macro_redefinition_is_rejected() {
    let err = load_err("#define A \"1\"\n#define A \"2\"\nX = 1;");
    assert!(err.contains("Cannot redefine A"), "{err}");
    let err = load_err("#define CurrentDir \"/elsewhere\"\nX = 1;");
    assert!(err.contains("Cannot redefine CurrentDir"), "{err}");
}

#[test]
fn invalid_directives() {
    assert!(load_err("#import \"x\"").contains("Invalid syntax"));
    assert!(load_err("#include x").contains("Invalid syntax"));
}

#[test]
fn include_loads_relative_files() {
    let dir = scratch_dir("include");
    std::fs::write(dir.join("common.cfg"), "Shared = 1;\n").unwrap();
    std::fs::write(
        dir.join("main.cfg"),
        "#include \"common.cfg\"\nLocal = 2;\n",
    )
    .unwrap();
    let defs = Definitions::load(dir.join("main.cfg")).unwrap();
    assert_eq!(defs.get("Shared"), Some(&Expr::Int(1)));
    assert_eq!(defs.get("Local"), Some(&Expr::Int(2)));
}

#[test]
fn include_is_processed_once() {
    let dir = scratch_dir("include-once");
    // Both files include the other; the guard stops the recursion and the
    // definitions land exactly once
    std::fs::write(
        dir.join("a.cfg"),
        "#include \"b.cfg\"\nFromA = 1;\n",
    )
    .unwrap();
    std::fs::write(
        dir.join("b.cfg"),
        "#include \"a.cfg\"\nFromB = 2;\n",
    )
    .unwrap();
    let defs = Definitions::load(dir.join("a.cfg")).unwrap();
    assert_eq!(defs.get("FromA"), Some(&Expr::Int(1)));
    assert_eq!(defs.get("FromB"), Some(&Expr::Int(2)));
}

#[test]
fn missing_include() {
    let dir = scratch_dir("missing-include");
    std::fs::write(dir.join("main.cfg"), "#include \"nowhere.cfg\"\n").unwrap();
    let err = format!("{:#}", Definitions::load(dir.join("main.cfg")).unwrap_err());
    assert!(err.contains("Failed to open config file"), "{err}");
    assert!(err.contains("nowhere.cfg"), "{err}");
}

#[test]
fn current_dir_follows_the_including_file() {
    let dir = scratch_dir("current-dir");
    let sub = dir.join("sub");
    std::fs::create_dir_all(&sub).unwrap();
    std::fs::write(sub.join("inner.cfg"), "Inner = CurrentDir();\n").unwrap();
    std::fs::write(
        dir.join("main.cfg"),
        "#include \"sub/inner.cfg\"\nOuter = CurrentDir();\n",
    )
    .unwrap();
    let defs = Definitions::load(dir.join("main.cfg")).unwrap();
    assert_eq!(defs.get("Inner"), Some(&Expr::Str(format!("{sub}/"))));
    assert_eq!(defs.get("Outer"), Some(&Expr::Str(format!("{dir}/"))));
}

#[test]
fn reserved_word_lookup() {
    assert!(is_reserved("List"));
    assert!(is_reserved("quote"));
    assert!(!is_reserved("list"));
    assert!(!is_reserved("Widget"));
}
