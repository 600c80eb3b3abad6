use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use swc_core::{
    common::{comments::Comments, SourceMapper, Span, Spanned, DUMMY_SP, SyntaxContext},
    ecma::{
        ast::*,
        utils::prepend_stmt,
        visit::{Visit, VisitMut, VisitMutWith, VisitWith},
    },
    plugin::{plugin_transform, proxies::TransformPluginProgramMetadata},
};

// -----------------------------------------------------------------------------
// Defaults & name rules
// -----------------------------------------------------------------------------

const DEFAULT_REFRESH_REG: &str = "$RefreshReg$";
const DEFAULT_REFRESH_SIG: &str = "$RefreshSig$";
const SIG_PREFIX: &str = "_s";
const RESET_DIRECTIVE: &str = "@refresh reset";
const HOOK_NAME_PATTERN: &str = "^use[A-Z]";

// Built-in hooks never appear in a signature's custom-hook list. The two
// state-seeding ones (useState, useReducer) additionally fold an argument
// into the key.
const BUILTIN_HOOKS: [&str; 10] = [
    "useState",
    "useReducer",
    "useEffect",
    "useLayoutEffect",
    "useMemo",
    "useCallback",
    "useRef",
    "useContext",
    "useImperativeHandle",
    "useDebugValue",
];

fn is_builtin_hook(name: &str) -> bool {
    BUILTIN_HOOKS.contains(&name)
}

fn is_componentish(name: &str) -> bool {
    name.chars()
        .next()
        .map(|c| c.is_ascii_uppercase())
        .unwrap_or(false)
}

// -----------------------------------------------------------------------------
// Config
// -----------------------------------------------------------------------------

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Identifier of the runtime registration entry point.
    pub refresh_reg: Option<String>,
    /// Identifier of the runtime signature-factory entry point.
    pub refresh_sig: Option<String>,
}

// -----------------------------------------------------------------------------
// Scan results
// -----------------------------------------------------------------------------

struct HookCall {
    name: String,
    callee: Expr,
    key: String, // binding pattern text + seed-argument fragment
}

struct CustomHook {
    name: String,
    callee: Expr,
}

// A top-level function whose body's direct statements contain hook calls.
// Located by (module item index, declarator index) so the tree itself stays
// untouched until the rewrite step.
struct SignedFn {
    item_index: usize,
    decl_index: usize,
    ident: Ident,
    key: String,
    custom_hooks: Vec<CustomHook>,
    reset_directive: bool,
}

struct FnSignature {
    item_index: usize,
    decl_index: usize,
    ident: Ident,
    sig_ident: Ident,
    key: String,
    custom_hooks: Vec<CustomHook>,
    force_reset: bool,
}

// -----------------------------------------------------------------------------
// Transform state
// -----------------------------------------------------------------------------

pub struct RefreshTransform<C: Comments> {
    refresh_reg: String,
    refresh_sig: String,
    comments: Option<C>,
    source_map: Option<Arc<dyn SourceMapper>>,
    hook_pattern: Regex,

    // -------- per-module state, rebuilt on every module --------
    hook_names: HashSet<String>,
    components: Vec<Ident>,
    signatures: Vec<FnSignature>,
    sig_serial: u32,
}

impl<C: Comments> RefreshTransform<C> {
    pub fn new(
        config: RefreshConfig,
        comments: Option<C>,
        source_map: Option<Arc<dyn SourceMapper>>,
    ) -> Self {
        Self {
            refresh_reg: config
                .refresh_reg
                .unwrap_or_else(|| DEFAULT_REFRESH_REG.to_string()),
            refresh_sig: config
                .refresh_sig
                .unwrap_or_else(|| DEFAULT_REFRESH_SIG.to_string()),
            comments,
            source_map,
            hook_pattern: Regex::new(HOOK_NAME_PATTERN).expect("static hook-name pattern"),
            hook_names: HashSet::new(),
            components: Vec::new(),
            signatures: Vec::new(),
            sig_serial: 0,
        }
    }

    fn is_hookish(&self, name: &str) -> bool {
        self.hook_pattern.is_match(name)
    }

    // ---------- source helpers ----------

    fn snippet(&self, span: Span) -> String {
        if span.is_dummy() {
            return String::new();
        }
        match &self.source_map {
            Some(cm) => cm.span_to_snippet(span).unwrap_or_default(),
            None => String::new(),
        }
    }

    /// Textual check over every comment attached directly before the
    /// statement. No comment-grammar parsing.
    fn has_reset_directive(&self, span: Span) -> bool {
        if span.is_dummy() {
            return false;
        }
        match &self.comments {
            Some(comments) => comments.get_leading(span.lo).map_or(false, |list| {
                list.iter().any(|c| c.text.contains(RESET_DIRECTIVE))
            }),
            None => false,
        }
    }

    // ---------- hook-call analysis ----------

    // Only the direct statements of the body are scanned. Missing a hook call
    // inside a nested block is fine; inventing one is not.
    fn collect_hook_calls(&self, body: &BlockStmt) -> Vec<HookCall> {
        let mut calls = Vec::new();
        for stmt in &body.stmts {
            match stmt {
                Stmt::Decl(Decl::Var(var)) => {
                    for declarator in &var.decls {
                        let call = match declarator.init.as_deref() {
                            Some(Expr::Call(call)) => call,
                            _ => continue,
                        };
                        if let Some(mut hook) = self.extract_hook_call(call) {
                            if var.decls.len() == 1 {
                                hook.key = format!(
                                    "{}{}",
                                    self.snippet(declarator.name.span()),
                                    hook.key
                                );
                            }
                            calls.push(hook);
                        }
                    }
                }
                Stmt::Expr(expr_stmt) => {
                    if let Expr::Call(call) = &*expr_stmt.expr {
                        if let Some(hook) = self.extract_hook_call(call) {
                            calls.push(hook);
                        }
                    }
                }
                _ => {}
            }
        }
        calls
    }

    fn extract_hook_call(&self, call: &CallExpr) -> Option<HookCall> {
        let callee = match &call.callee {
            Callee::Expr(expr) => &**expr,
            _ => return None,
        };
        let name = match callee {
            Expr::Ident(id) => id.sym.to_string(),
            Expr::Member(member) => match &member.prop {
                MemberProp::Ident(prop) => prop.sym.to_string(),
                _ => return None,
            },
            _ => return None,
        };
        if !self.is_hookish(&name) {
            return None;
        }

        // Editing the seed value must change the signature even when no call
        // was added, removed, or reordered.
        let mut key = String::new();
        if name == "useState" && !call.args.is_empty() {
            key.push('(');
            key.push_str(&self.snippet(call.args[0].expr.span()));
            key.push(')');
        } else if name == "useReducer" && call.args.len() > 1 {
            key.push('(');
            key.push_str(&self.snippet(call.args[1].expr.span()));
            key.push(')');
        }

        Some(HookCall {
            name,
            callee: callee.clone(),
            key,
        })
    }

    // ---------- declaration scan ----------

    fn scan_module(&mut self, module: &Module) -> Vec<SignedFn> {
        let mut scanned = Vec::new();
        for (index, item) in module.body.iter().enumerate() {
            match item {
                ModuleItem::ModuleDecl(ModuleDecl::Import(import)) => self.scan_import(import),
                ModuleItem::Stmt(Stmt::Decl(decl)) => {
                    self.scan_decl(index, decl, item.span(), &mut scanned)
                }
                ModuleItem::ModuleDecl(ModuleDecl::ExportDecl(export)) => {
                    self.scan_decl(index, &export.decl, item.span(), &mut scanned)
                }
                ModuleItem::ModuleDecl(ModuleDecl::ExportDefaultDecl(export)) => {
                    if let DefaultDecl::Fn(f) = &export.decl {
                        if let Some(ident) = &f.ident {
                            self.scan_function(
                                index,
                                0,
                                ident,
                                &f.function,
                                item.span(),
                                &mut scanned,
                            );
                        }
                    }
                }
                _ => {}
            }
        }
        scanned
    }

    // Aliased and re-exported hooks come in through their local binding.
    fn scan_import(&mut self, import: &ImportDecl) {
        for specifier in &import.specifiers {
            let local = match specifier {
                ImportSpecifier::Named(named) => &named.local,
                ImportSpecifier::Default(default) => &default.local,
                ImportSpecifier::Namespace(_) => continue,
            };
            if self.is_hookish(local.sym.as_ref()) {
                self.hook_names.insert(local.sym.to_string());
            }
        }
    }

    fn scan_decl(
        &mut self,
        index: usize,
        decl: &Decl,
        stmt_span: Span,
        scanned: &mut Vec<SignedFn>,
    ) {
        match decl {
            Decl::Fn(f) => self.scan_function(index, 0, &f.ident, &f.function, stmt_span, scanned),
            Decl::Var(var) => {
                for (slot, declarator) in var.decls.iter().enumerate() {
                    let ident = match declarator.name.as_ident() {
                        Some(binding) => binding.id.clone(),
                        None => continue,
                    };
                    let body = match declarator.init.as_deref() {
                        Some(Expr::Fn(f)) => f.function.body.as_ref(),
                        // Concise arrow bodies have no statements to scan, but
                        // the name still classifies.
                        Some(Expr::Arrow(arrow)) => match &*arrow.body {
                            BlockStmtOrExpr::BlockStmt(body) => Some(body),
                            BlockStmtOrExpr::Expr(_) => None,
                        },
                        _ => continue,
                    };
                    self.classify_name(&ident);
                    if let Some(body) = body {
                        self.record_signed_fn(index, slot, &ident, body, stmt_span, scanned);
                    }
                }
            }
            _ => {}
        }
    }

    fn scan_function(
        &mut self,
        index: usize,
        slot: usize,
        ident: &Ident,
        function: &Function,
        stmt_span: Span,
        scanned: &mut Vec<SignedFn>,
    ) {
        self.classify_name(ident);
        if let Some(body) = &function.body {
            self.record_signed_fn(index, slot, ident, body, stmt_span, scanned);
        }
    }

    fn classify_name(&mut self, ident: &Ident) {
        let name = ident.sym.as_ref();
        if is_componentish(name) {
            self.components.push(ident.clone());
        } else if self.is_hookish(name) {
            self.hook_names.insert(name.to_string());
        }
    }

    fn record_signed_fn(
        &mut self,
        index: usize,
        slot: usize,
        ident: &Ident,
        body: &BlockStmt,
        stmt_span: Span,
        scanned: &mut Vec<SignedFn>,
    ) {
        let calls = self.collect_hook_calls(body);
        if calls.is_empty() {
            return;
        }
        // Order-sensitive on purpose: hook state is positional, so swapping
        // two calls is a different signature.
        let key = calls
            .iter()
            .map(|call| format!("{}{{{}}}", call.name, call.key))
            .collect::<Vec<_>>()
            .join("\n");
        let custom_hooks = calls
            .into_iter()
            .filter(|call| !is_builtin_hook(&call.name))
            .map(|call| CustomHook {
                name: call.name,
                callee: call.callee,
            })
            .collect();
        scanned.push(SignedFn {
            item_index: index,
            decl_index: slot,
            ident: ident.clone(),
            key,
            custom_hooks,
            reset_directive: self.has_reset_directive(stmt_span),
        });
    }

    // ---------- signature synthesis ----------

    fn synthesize(&mut self, scanned: Vec<SignedFn>, module: &Module) {
        if scanned.is_empty() {
            return;
        }
        let mut used = HashSet::new();
        module.visit_with(&mut UsedNameCollector { out: &mut used });
        for signed in scanned {
            let sig_ident = self.fresh_sig_ident(&mut used);
            let total = signed.custom_hooks.len();
            let custom_hooks: Vec<CustomHook> = signed
                .custom_hooks
                .into_iter()
                .filter(|hook| self.hook_names.contains(&hook.name))
                .collect();
            // A custom hook we cannot resolve locally could change shape
            // without us noticing, so treat it as always changed.
            let force_reset = signed.reset_directive || custom_hooks.len() < total;
            self.signatures.push(FnSignature {
                item_index: signed.item_index,
                decl_index: signed.decl_index,
                ident: signed.ident,
                sig_ident,
                key: signed.key,
                custom_hooks,
                force_reset,
            });
        }
    }

    fn fresh_sig_ident(&mut self, used: &mut HashSet<String>) -> Ident {
        loop {
            self.sig_serial += 1;
            let name = if self.sig_serial == 1 {
                SIG_PREFIX.to_string()
            } else {
                format!("{}{}", SIG_PREFIX, self.sig_serial)
            };
            if used.insert(name.clone()) {
                return plain_ident(&name);
            }
        }
    }

    // ---------- rewrite ----------

    fn rewrite_module(&mut self, module: &mut Module) {
        if self.signatures.is_empty() && self.components.is_empty() {
            return;
        }
        let items = std::mem::take(&mut module.body);
        let mut body =
            Vec::with_capacity(items.len() + 2 * self.signatures.len() + self.components.len());
        let mut cursor = 0usize;
        for (index, mut item) in items.into_iter().enumerate() {
            let start = cursor;
            while cursor < self.signatures.len() && self.signatures[cursor].item_index == index {
                cursor += 1;
            }
            for sig in &self.signatures[start..cursor] {
                instrument_function(&mut item, sig);
            }
            body.push(item);
            // Recording statements land directly after the defining statement,
            // one per signed declarator, in declarator order.
            for sig in &self.signatures[start..cursor] {
                body.push(self.recording_stmt(sig));
            }
        }
        if !self.signatures.is_empty() {
            prepend_stmt(&mut body, self.signature_factory_stmt());
        }
        for component in &self.components {
            body.push(self.registration_stmt(component));
        }
        module.body = body;
    }

    // var _s = $RefreshSig$(), _s2 = $RefreshSig$();
    fn signature_factory_stmt(&self) -> ModuleItem {
        let decls = self
            .signatures
            .iter()
            .map(|sig| VarDeclarator {
                span: DUMMY_SP,
                name: Pat::Ident(BindingIdent {
                    id: sig.sig_ident.clone(),
                    type_ann: None,
                }),
                init: Some(Box::new(call_expr(
                    Expr::Ident(plain_ident(&self.refresh_sig)),
                    vec![],
                ))),
                definite: false,
            })
            .collect();
        ModuleItem::Stmt(Stmt::Decl(Decl::Var(Box::new(VarDecl {
            span: DUMMY_SP,
            kind: VarDeclKind::Var,
            declare: false,
            decls,
            ctxt: SyntaxContext::empty(),
        }))))
    }

    /// _sN(Fn, "key", forceReset?, getCustomHooks?);
    ///
    /// Trailing arguments are dropped when unneeded, but the boolean stays
    /// whenever the hook getter follows it; the runtime reads positionally.
    fn recording_stmt(&self, sig: &FnSignature) -> ModuleItem {
        let mut args = vec![
            ExprOrSpread {
                spread: None,
                expr: Box::new(Expr::Ident(sig.ident.clone())),
            },
            ExprOrSpread {
                spread: None,
                expr: Box::new(Expr::Lit(Lit::Str(Str {
                    span: DUMMY_SP,
                    value: sig.key.clone().into(),
                    raw: None,
                }))),
            },
        ];
        if sig.force_reset || !sig.custom_hooks.is_empty() {
            args.push(ExprOrSpread {
                spread: None,
                expr: Box::new(Expr::Lit(Lit::Bool(Bool {
                    span: DUMMY_SP,
                    value: sig.force_reset,
                }))),
            });
        }
        if !sig.custom_hooks.is_empty() {
            // () => [useFoo, Ns.useBar]
            let elems = sig
                .custom_hooks
                .iter()
                .map(|hook| {
                    Some(ExprOrSpread {
                        spread: None,
                        expr: Box::new(hook.callee.clone()),
                    })
                })
                .collect();
            let getter = Expr::Arrow(ArrowExpr {
                span: DUMMY_SP,
                params: vec![],
                body: Box::new(BlockStmtOrExpr::Expr(Box::new(Expr::Array(ArrayLit {
                    span: DUMMY_SP,
                    elems,
                })))),
                is_async: false,
                is_generator: false,
                type_params: None,
                return_type: None,
                ctxt: SyntaxContext::empty(),
            });
            args.push(ExprOrSpread {
                spread: None,
                expr: Box::new(getter),
            });
        }
        expr_stmt(call_expr(Expr::Ident(sig.sig_ident.clone()), args))
    }

    // $RefreshReg$(Component, "Component");
    fn registration_stmt(&self, component: &Ident) -> ModuleItem {
        let args = vec![
            ExprOrSpread {
                spread: None,
                expr: Box::new(Expr::Ident(component.clone())),
            },
            ExprOrSpread {
                spread: None,
                expr: Box::new(Expr::Lit(Lit::Str(Str {
                    span: DUMMY_SP,
                    value: component.sym.clone(),
                    raw: None,
                }))),
            },
        ];
        expr_stmt(call_expr(
            Expr::Ident(plain_ident(&self.refresh_reg)),
            args,
        ))
    }
}

// -----------------------------------------------------------------------------
// Tree construction helpers
// -----------------------------------------------------------------------------

fn plain_ident(name: &str) -> Ident {
    Ident::new(name.into(), DUMMY_SP, SyntaxContext::empty())
}

fn call_expr(callee: Expr, args: Vec<ExprOrSpread>) -> Expr {
    Expr::Call(CallExpr {
        span: DUMMY_SP,
        callee: Callee::Expr(Box::new(callee)),
        args,
        type_args: None,
        ctxt: SyntaxContext::empty(),
    })
}

fn expr_stmt(expr: Expr) -> ModuleItem {
    ModuleItem::Stmt(Stmt::Expr(ExprStmt {
        span: DUMMY_SP,
        expr: Box::new(expr),
    }))
}

// Insert `_sN();` as the first statement of the signed function's body, after
// any directive prologue.
fn instrument_function(item: &mut ModuleItem, sig: &FnSignature) {
    let entry = Stmt::Expr(ExprStmt {
        span: DUMMY_SP,
        expr: Box::new(call_expr(Expr::Ident(sig.sig_ident.clone()), vec![])),
    });
    match item {
        ModuleItem::Stmt(Stmt::Decl(decl)) => instrument_decl(decl, sig, entry),
        ModuleItem::ModuleDecl(ModuleDecl::ExportDecl(export)) => {
            instrument_decl(&mut export.decl, sig, entry)
        }
        ModuleItem::ModuleDecl(ModuleDecl::ExportDefaultDecl(export)) => {
            if let DefaultDecl::Fn(f) = &mut export.decl {
                if let Some(body) = &mut f.function.body {
                    prepend_stmt(&mut body.stmts, entry);
                }
            }
        }
        _ => {}
    }
}

fn instrument_decl(decl: &mut Decl, sig: &FnSignature, entry: Stmt) {
    match decl {
        Decl::Fn(f) => {
            if let Some(body) = &mut f.function.body {
                prepend_stmt(&mut body.stmts, entry);
            }
        }
        Decl::Var(var) => {
            let declarator = match var.decls.get_mut(sig.decl_index) {
                Some(declarator) => declarator,
                None => return,
            };
            match declarator.init.as_deref_mut() {
                Some(Expr::Fn(f)) => {
                    if let Some(body) = &mut f.function.body {
                        prepend_stmt(&mut body.stmts, entry);
                    }
                }
                Some(Expr::Arrow(arrow)) => {
                    if let BlockStmtOrExpr::BlockStmt(body) = &mut *arrow.body {
                        prepend_stmt(&mut body.stmts, entry);
                    }
                }
                _ => {}
            }
        }
        _ => {}
    }
}

// -----------------------------------------------------------------------------
// Used-name collection
// -----------------------------------------------------------------------------

// Every identifier spelling in the module, so freshly minted signature ids
// cannot collide with an existing binding.
struct UsedNameCollector<'a> {
    out: &'a mut HashSet<String>,
}

impl Visit for UsedNameCollector<'_> {
    fn visit_ident(&mut self, ident: &Ident) {
        self.out.insert(ident.sym.to_string());
    }
}

// -----------------------------------------------------------------------------
// Visitor impl
// -----------------------------------------------------------------------------

impl<C: Comments> VisitMut for RefreshTransform<C> {
    fn visit_mut_module(&mut self, module: &mut Module) {
        self.hook_names.clear();
        self.components.clear();
        self.signatures.clear();
        self.sig_serial = 0;

        let scanned = self.scan_module(module);
        self.synthesize(scanned, module);
        self.rewrite_module(module);
    }
}

// -----------------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------------

#[plugin_transform]
pub fn process_transform(mut program: Program, metadata: TransformPluginProgramMetadata) -> Program {
    let config: RefreshConfig = metadata
        .get_transform_plugin_config()
        .map(|raw| serde_json::from_str(&raw).unwrap_or_default())
        .unwrap_or_default();

    let source_map: Option<Arc<dyn SourceMapper>> = Some(Arc::new(metadata.source_map));

    let mut transform = RefreshTransform::new(config, metadata.comments, source_map);
    program.visit_mut_with(&mut transform);
    program
}
