#![allow(dead_code)]

use std::sync::Arc;

use swc_core::{
    common::{comments::SingleThreadedComments, sync::Lrc, FileName, SourceMap, SourceMapper},
    ecma::{
        ast::*,
        codegen::{text_writer::JsWriter, Emitter},
        parser::{lexer::Lexer, EsSyntax, Parser, StringInput, Syntax},
        visit::VisitMutWith,
    },
};

use refresh_swc_plugin::{RefreshConfig, RefreshTransform};

pub fn transform_module(src: &str) -> (Module, Lrc<SourceMap>) {
    transform_module_with(src, RefreshConfig::default())
}

pub fn transform_module_with(src: &str, config: RefreshConfig) -> (Module, Lrc<SourceMap>) {
    let cm: Lrc<SourceMap> = Default::default();
    let fm = cm.new_source_file(
        Lrc::new(FileName::Custom("module.js".into())),
        src.to_string(),
    );
    let comments = SingleThreadedComments::default();
    let lexer = Lexer::new(
        Syntax::Es(EsSyntax::default()),
        EsVersion::latest(),
        StringInput::from(&*fm),
        Some(&comments),
    );
    let mut parser = Parser::new_from(lexer);
    let mut module = parser.parse_module().expect("fixture parses");

    let source_map: Arc<dyn SourceMapper> = cm.clone();
    let mut pass = RefreshTransform::new(config, Some(comments.clone()), Some(source_map));
    module.visit_mut_with(&mut pass);
    (module, cm)
}

pub fn transform_script(src: &str) -> Script {
    let cm: Lrc<SourceMap> = Default::default();
    let fm = cm.new_source_file(
        Lrc::new(FileName::Custom("script.js".into())),
        src.to_string(),
    );
    let comments = SingleThreadedComments::default();
    let lexer = Lexer::new(
        Syntax::Es(EsSyntax::default()),
        EsVersion::latest(),
        StringInput::from(&*fm),
        Some(&comments),
    );
    let mut parser = Parser::new_from(lexer);
    let mut script = parser.parse_script().expect("fixture parses");

    let source_map: Arc<dyn SourceMapper> = cm.clone();
    let mut pass = RefreshTransform::new(
        RefreshConfig::default(),
        Some(comments.clone()),
        Some(source_map),
    );
    script.visit_mut_with(&mut pass);
    script
}

pub fn print(cm: &Lrc<SourceMap>, module: &Module) -> String {
    let mut buf = Vec::new();
    {
        let mut emitter = Emitter {
            cfg: Default::default(),
            cm: cm.clone(),
            comments: None,
            wr: JsWriter::new(cm.clone(), "\n", &mut buf, None),
        };
        emitter.emit_module(module).expect("codegen succeeds");
    }
    String::from_utf8(buf).expect("utf8 output")
}

// ---------- structural finders ----------

pub fn callee_name(call: &CallExpr) -> Option<String> {
    match &call.callee {
        Callee::Expr(expr) => match &**expr {
            Expr::Ident(id) => Some(id.sym.to_string()),
            _ => None,
        },
        _ => None,
    }
}

fn as_top_level_call(item: &ModuleItem) -> Option<&CallExpr> {
    match item {
        ModuleItem::Stmt(Stmt::Expr(expr_stmt)) => match &*expr_stmt.expr {
            Expr::Call(call) => Some(call),
            _ => None,
        },
        _ => None,
    }
}

/// Top-level expression-statement calls whose callee is the given identifier.
pub fn top_level_calls<'a>(module: &'a Module, callee: &str) -> Vec<&'a CallExpr> {
    module
        .body
        .iter()
        .filter_map(as_top_level_call)
        .filter(|call| callee_name(call).as_deref() == Some(callee))
        .collect()
}

/// `(component, name)` pairs of every registration call, in order.
pub fn registered_names(module: &Module, refresh_reg: &str) -> Vec<(String, String)> {
    top_level_calls(module, refresh_reg)
        .into_iter()
        .filter_map(|call| {
            let component = match &*call.args.first()?.expr {
                Expr::Ident(id) => id.sym.to_string(),
                _ => return None,
            };
            let name = match &*call.args.get(1)?.expr {
                Expr::Lit(Lit::Str(s)) => s.value.to_string(),
                _ => return None,
            };
            Some((component, name))
        })
        .collect()
}

fn is_recording_for(call: &CallExpr, target: &str) -> bool {
    let callee = match callee_name(call) {
        Some(name) => name,
        None => return false,
    };
    if !callee.starts_with("_s") || call.args.len() < 2 {
        return false;
    }
    matches!(&*call.args[0].expr, Expr::Ident(id) if id.sym.as_ref() == target)
}

/// The `_sN(target, "key", ...)` recording call for a signed function.
pub fn recording_call<'a>(module: &'a Module, target: &str) -> Option<&'a CallExpr> {
    module
        .body
        .iter()
        .filter_map(as_top_level_call)
        .find(|call| is_recording_for(call, target))
}

pub fn recording_index(module: &Module, target: &str) -> Option<usize> {
    module.body.iter().position(|item| {
        as_top_level_call(item).map_or(false, |call| is_recording_for(call, target))
    })
}

pub fn key_for(module: &Module, target: &str) -> Option<String> {
    let call = recording_call(module, target)?;
    match &*call.args.get(1)?.expr {
        Expr::Lit(Lit::Str(s)) => Some(s.value.to_string()),
        _ => None,
    }
}

pub fn force_reset_of(call: &CallExpr) -> Option<bool> {
    match &*call.args.get(2)?.expr {
        Expr::Lit(Lit::Bool(b)) => Some(b.value),
        _ => None,
    }
}

/// Names returned by the `getCustomHooks` getter argument, if present.
pub fn custom_hook_names(call: &CallExpr) -> Vec<String> {
    let arg = match call.args.get(3) {
        Some(arg) => arg,
        None => return Vec::new(),
    };
    let arrow = match &*arg.expr {
        Expr::Arrow(arrow) => arrow,
        _ => return Vec::new(),
    };
    let body = match &*arrow.body {
        BlockStmtOrExpr::Expr(expr) => expr,
        _ => return Vec::new(),
    };
    let array = match &**body {
        Expr::Array(array) => array,
        _ => return Vec::new(),
    };
    array
        .elems
        .iter()
        .flatten()
        .map(|el| match &*el.expr {
            Expr::Ident(id) => id.sym.to_string(),
            _ => "<expr>".to_string(),
        })
        .collect()
}

/// Total count of `$RefreshSig$()`-initialized declarators across the module.
pub fn sig_factory_count(module: &Module, refresh_sig: &str) -> usize {
    module
        .body
        .iter()
        .filter_map(|item| {
            let var = match item {
                ModuleItem::Stmt(Stmt::Decl(Decl::Var(var))) => var,
                _ => return None,
            };
            let all_factories = !var.decls.is_empty()
                && var.decls.iter().all(|d| {
                    matches!(
                        d.init.as_deref(),
                        Some(Expr::Call(call)) if callee_name(call).as_deref() == Some(refresh_sig)
                    )
                });
            if all_factories {
                Some(var.decls.len())
            } else {
                None
            }
        })
        .sum()
}

fn var_fn_body<'a>(declarator: &'a VarDeclarator, name: &str) -> Option<&'a BlockStmt> {
    let binding = declarator.name.as_ident()?;
    if binding.id.sym.as_ref() != name {
        return None;
    }
    match declarator.init.as_deref() {
        Some(Expr::Fn(f)) => f.function.body.as_ref(),
        Some(Expr::Arrow(arrow)) => match &*arrow.body {
            BlockStmtOrExpr::BlockStmt(body) => Some(body),
            BlockStmtOrExpr::Expr(_) => None,
        },
        _ => None,
    }
}

fn decl_fn_body<'a>(decl: &'a Decl, name: &str) -> Option<&'a BlockStmt> {
    match decl {
        Decl::Fn(f) if f.ident.sym.as_ref() == name => f.function.body.as_ref(),
        Decl::Var(var) => var.decls.iter().find_map(|d| var_fn_body(d, name)),
        _ => None,
    }
}

/// Block body of the top-level function bound to `name`, looking through
/// export wrappers.
pub fn fn_body<'a>(module: &'a Module, name: &str) -> Option<&'a BlockStmt> {
    module.body.iter().find_map(|item| match item {
        ModuleItem::Stmt(Stmt::Decl(decl)) => decl_fn_body(decl, name),
        ModuleItem::ModuleDecl(ModuleDecl::ExportDecl(export)) => decl_fn_body(&export.decl, name),
        ModuleItem::ModuleDecl(ModuleDecl::ExportDefaultDecl(export)) => match &export.decl {
            DefaultDecl::Fn(f)
                if f.ident.as_ref().map(|i| i.sym.as_ref()) == Some(name) =>
            {
                f.function.body.as_ref()
            }
            _ => None,
        },
        _ => None,
    })
}

/// Index of the module item that declares the binding `name`.
pub fn defining_index(module: &Module, name: &str) -> Option<usize> {
    module.body.iter().position(|item| {
        let decl = match item {
            ModuleItem::Stmt(Stmt::Decl(decl)) => decl,
            ModuleItem::ModuleDecl(ModuleDecl::ExportDecl(export)) => &export.decl,
            ModuleItem::ModuleDecl(ModuleDecl::ExportDefaultDecl(export)) => {
                return matches!(
                    &export.decl,
                    DefaultDecl::Fn(f)
                        if f.ident.as_ref().map(|i| i.sym.as_ref()) == Some(name)
                );
            }
            _ => return false,
        };
        match decl {
            Decl::Fn(f) => f.ident.sym.as_ref() == name,
            Decl::Var(var) => var.decls.iter().any(|d| {
                d.name
                    .as_ident()
                    .map(|b| b.id.sym.as_ref() == name)
                    .unwrap_or(false)
            }),
            _ => false,
        }
    })
}

/// A bare `_sN();` call, the body-entry marker of a signed function.
pub fn is_sig_entry(stmt: &Stmt) -> bool {
    let expr_stmt = match stmt {
        Stmt::Expr(expr_stmt) => expr_stmt,
        _ => return false,
    };
    let call = match &*expr_stmt.expr {
        Expr::Call(call) => call,
        _ => return false,
    };
    callee_name(call).map_or(false, |name| name.starts_with("_s")) && call.args.is_empty()
}
