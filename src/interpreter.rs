//! The directive interpreter: a single-pass forward walk over the
//! component stream with forward-skip (branch skipping) and backward-seek
//! (loop iteration) — see §4.4.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use smallvec::SmallVec;

use crate::config;
use crate::debug::Tracer;
use crate::directive::{self, Classified, DESC_LEVEL, INC_LEVEL};
use crate::error::{MextError, SourceLocation};
use crate::formatters::FormatterRegistry;
use crate::lexer::{self, Component};
use crate::loader::{self, FileTemplateLoader, TemplateLoader};
use crate::resolve;
use crate::value::{Scope, Value};
use crate::whitespace::WhitespaceController;

/// A callback invoked by `@input VARNAME`, receiving the output produced so
/// far and returning the value to both append and bind.
pub type Callback = Rc<dyn Fn(&str) -> Result<Value, MextError>>;

const VARIABLE_PATTERN: &str = r"[0-9a-zA-Z_\-.\[\]]+";

static INCLUDE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r#"^(?:"(?P<filepath>(?:[^"\\]|\\.)*)"|(?P<filepath_var>{v}))(?:\s+(?P<params>(?:{v}={v})(?:,\s*{v}={v})*))?$"#,
        v = VARIABLE_PATTERN
    ))
    .unwrap()
});

static IMPORT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r#"^(?:"(?P<filepath>(?:[^"\\]|\\.)*)"|(?P<filepath_var>{v}))(?:\s+as\s+(?P<namespace>{v}))?$"#,
        v = VARIABLE_PATTERN
    ))
    .unwrap()
});

static IF_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^(?P<operators>(?:not\s+)?(?:(?:empty|undefined|novalue)\s+)?)(?P<varname>{v})",
        v = VARIABLE_PATTERN
    ))
    .unwrap()
});

static FOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^(?P<varnames>{v}(?:,\s*{v})*)\s+in\s+(?P<iterable_name>{v})",
        v = VARIABLE_PATTERN
    ))
    .unwrap()
});

static FORMAT_ARG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^(?P<varname>{v})(?:\s+(?P<params>(?:{v}={v})(?:,\s*{v}={v})*))?$",
        v = VARIABLE_PATTERN
    ))
    .unwrap()
});

#[derive(Debug, Clone)]
enum ForItem {
    Single(Value),
    Pair(Value, Value),
}

struct ForContext {
    // `@for a, b in ...` rarely binds more than a couple of loop variables.
    varnames: SmallVec<[String; 2]>,
    remaining: VecDeque<ForItem>,
    entry_mark: i64,
}

/// A reusable parser instance. Constructing a fresh one is cheap; call
/// [`Parser::render`] (or the `render_file` helper) once per template.
pub struct Parser {
    components: Vec<Component>,
    pos_index: i64,
    level: i64,
    linenumbers: Vec<usize>,
    current: Classified,

    results: Vec<String>,
    options: HashMap<String, bool>,
    for_context: Vec<ForContext>,
    whitespace: WhitespaceController,

    scope: Scope,
    callbacks: IndexMap<String, Callback>,
    pub(crate) input_results: IndexMap<String, Value>,

    template_fn: Option<PathBuf>,
    template_loader: Rc<dyn TemplateLoader>,
    include_stack: Rc<RefCell<HashSet<PathBuf>>>,

    formatters: FormatterRegistry,
    tracer: Tracer,

    // Ambient overrides set by `use_template`/`use_params`/`use_callbacks` and
    // consulted by `compose`. Unlike the fields above these survive across
    // `render` calls, mirroring `Mext`'s instance attributes in mext.py.
    ambient_template: Option<String>,
    ambient_template_fn: Option<PathBuf>,
    ambient_params: IndexMap<String, Value>,
    ambient_callbacks: IndexMap<String, Callback>,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

/// Restores the ambient template on drop. See [`Parser::use_template`].
pub struct TemplateGuard<'a> {
    parser: &'a mut Parser,
    previous_template: Option<String>,
    previous_template_fn: Option<PathBuf>,
}

impl Drop for TemplateGuard<'_> {
    fn drop(&mut self) {
        self.parser.ambient_template = self.previous_template.take();
        self.parser.ambient_template_fn = self.previous_template_fn.take();
    }
}

/// Restores the ambient params on drop. See [`Parser::use_params`].
pub struct ParamsGuard<'a> {
    parser: &'a mut Parser,
    previous_params: IndexMap<String, Value>,
}

impl Drop for ParamsGuard<'_> {
    fn drop(&mut self) {
        self.parser.ambient_params = std::mem::take(&mut self.previous_params);
    }
}

/// Restores the ambient callbacks on drop. See [`Parser::use_callbacks`].
pub struct CallbacksGuard<'a> {
    parser: &'a mut Parser,
    previous_callbacks: IndexMap<String, Callback>,
}

impl Drop for CallbacksGuard<'_> {
    fn drop(&mut self) {
        self.parser.ambient_callbacks = std::mem::take(&mut self.previous_callbacks);
    }
}

impl Parser {
    pub fn new() -> Self {
        let mut options = HashMap::new();
        options.insert("final_strip".to_string(), true);
        Self {
            components: Vec::new(),
            pos_index: -1,
            level: 0,
            linenumbers: vec![1],
            current: Classified {
                keyword: None,
                statement: None,
            },
            results: Vec::new(),
            options,
            for_context: Vec::new(),
            whitespace: WhitespaceController::new(),
            scope: Scope::new(IndexMap::new()),
            callbacks: IndexMap::new(),
            input_results: IndexMap::new(),
            template_fn: None,
            template_loader: Rc::new(FileTemplateLoader::new()),
            include_stack: Rc::new(RefCell::new(HashSet::new())),
            formatters: FormatterRegistry::new(),
            tracer: Tracer::new(),
            ambient_template: None,
            ambient_template_fn: None,
            ambient_params: IndexMap::new(),
            ambient_callbacks: IndexMap::new(),
        }
    }

    pub fn with_loader(loader: Rc<dyn TemplateLoader>) -> Self {
        let mut p = Self::new();
        p.template_loader = loader;
        p
    }

    pub fn register_formatter(&self, name: impl Into<String>, f: crate::formatters::FormatterFn) {
        self.formatters.register(name, f);
    }

    pub fn remove_formatter(&self, name: &str) {
        self.formatters.remove(name);
    }

    pub fn enable_trace(&mut self, enabled: bool) {
        self.tracer.set_enabled(enabled);
    }

    pub fn trace(&self) -> &[crate::debug::TraceEntry] {
        self.tracer.entries()
    }

    pub fn input_results(&self) -> &IndexMap<String, Value> {
        &self.input_results
    }

    fn reset(&mut self) {
        self.components.clear();
        self.pos_index = -1;
        self.level = 0;
        self.linenumbers = vec![1];
        self.current = Classified {
            keyword: None,
            statement: None,
        };
        self.results.clear();
        self.options = {
            let mut m = HashMap::new();
            m.insert("final_strip".to_string(), true);
            m
        };
        self.for_context.clear();
        self.whitespace = WhitespaceController::new();
        self.input_results.clear();
    }

    /// Renders `template` (with an optional originating file path, used for
    /// relative include/import resolution and error annotations).
    pub fn render(
        &mut self,
        template: String,
        template_fn: Option<PathBuf>,
        params: IndexMap<String, Value>,
        callbacks: IndexMap<String, Callback>,
    ) -> Result<String, MextError> {
        self.reset();
        self.components = lexer::split_components(&template)?;
        self.template_fn = template_fn;
        self.scope = Scope::new(params);
        self.callbacks = callbacks;

        while self.step()? {
            self.process_current_literal();

            if let Some(keyword) = self.current.keyword.clone() {
                if INC_LEVEL.contains(&keyword.as_str()) {
                    self.level += 1;
                } else if DESC_LEVEL.contains(&keyword.as_str()) {
                    self.level -= 1;
                }
                self.dispatch(&keyword)?;
            } else if self.current.statement.is_some() {
                self.parse_field()?;
            }
        }

        Ok(self.parsed_result_snapshot())
    }

    pub fn render_file(
        &mut self,
        path: &Path,
        params: IndexMap<String, Value>,
        callbacks: IndexMap<String, Callback>,
    ) -> Result<String, MextError> {
        let template = self.template_loader.load(path)?;
        self.render(template, Some(path.to_path_buf()), params, callbacks)
    }

    /// Renders using whatever `template`/`template_fn` and merged
    /// `params`/`callbacks` are in scope: an explicit argument here wins,
    /// otherwise the ambient value set by [`Parser::use_template`] /
    /// [`Parser::use_params`] / [`Parser::use_callbacks`] is used. Mirrors
    /// `Mext.compose`'s `template = template or self.template` fallback.
    pub fn compose(
        &mut self,
        template: Option<String>,
        template_fn: Option<PathBuf>,
        params: IndexMap<String, Value>,
        callbacks: IndexMap<String, Callback>,
    ) -> Result<String, MextError> {
        let template = template.or_else(|| self.ambient_template.clone());
        let template_fn = template_fn.or_else(|| self.ambient_template_fn.clone());

        let mut merged_params = self.ambient_params.clone();
        merged_params.extend(params);
        let mut merged_callbacks = self.ambient_callbacks.clone();
        merged_callbacks.extend(callbacks);

        let template = match (template, &template_fn) {
            (Some(t), _) => t,
            (None, Some(path)) => self.template_loader.load(path)?,
            (None, None) => {
                return Err(MextError::runtime(
                    "compose called with no template set (pass one or use_template first)",
                    SourceLocation::unknown(),
                ));
            }
        };

        self.render(template, template_fn, merged_params, merged_callbacks)
    }

    /// Scopes a template override for the duration of the returned guard,
    /// restoring the previous ambient template on drop. Ports
    /// `mext.py`'s `Mext.use_template` context manager.
    pub fn use_template(&mut self, template: Option<String>, template_fn: Option<PathBuf>) -> TemplateGuard<'_> {
        let previous_template = self.ambient_template.take();
        let previous_template_fn = self.ambient_template_fn.take();
        self.ambient_template = template;
        self.ambient_template_fn = template_fn;
        TemplateGuard {
            parser: self,
            previous_template,
            previous_template_fn,
        }
    }

    /// Scopes a params override (merged over the current ambient params) for
    /// the duration of the returned guard, restoring the previous ambient
    /// params on drop. Ports `mext.py`'s `Mext.use_params` context manager.
    pub fn use_params(&mut self, params: IndexMap<String, Value>) -> ParamsGuard<'_> {
        let previous_params = self.ambient_params.clone();
        self.ambient_params.extend(params);
        ParamsGuard {
            parser: self,
            previous_params,
        }
    }

    /// Scopes a callbacks override (merged over the current ambient
    /// callbacks) for the duration of the returned guard, restoring the
    /// previous ambient callbacks on drop. Extrapolated from `use_template`/
    /// `use_params` for symmetry; the original `Mext` wrapper only scopes
    /// template and params, passing callbacks as a direct `compose` argument.
    pub fn use_callbacks(&mut self, callbacks: IndexMap<String, Callback>) -> CallbacksGuard<'_> {
        let previous_callbacks = self.ambient_callbacks.clone();
        self.ambient_callbacks.extend(callbacks);
        CallbacksGuard {
            parser: self,
            previous_callbacks,
        }
    }

    fn dispatch(&mut self, keyword: &str) -> Result<(), MextError> {
        match keyword {
            "option" => self.parse_option(),
            "set" => self.parse_set(),
            "default" => self.parse_default(),
            "count" => self.parse_count(),
            "include" => self.parse_include(),
            "input" => self.parse_input(),
            "import" => self.parse_import(),
            "if" => self.parse_if(),
            "elif" => self.parse_elif(),
            "else" => self.parse_else(),
            "endif" => self.parse_endif(),
            "for" => self.parse_for(),
            "endfor" => self.parse_endfor(),
            "trim_newline" => self.parse_trim_newline(),
            "format" => self.parse_format(),
            "comment" => self.parse_comment(),
            "endcomment" => self.parse_endcomment(),
            other => Err(MextError::syntax(
                format!("\"{other}\" is not a valid keyword."),
                self.current_location(),
            )),
        }
    }

    // ---- component cursor -------------------------------------------------

    fn step(&mut self) -> Result<bool, MextError> {
        if self.pos_index + 1 >= self.components.len() as i64 {
            return Ok(false);
        }
        self.pos_index += 1;
        let idx = self.pos_index as usize;
        let newline_count = self.components[idx].literal_text.matches('\n').count();
        let last = *self.linenumbers.last().unwrap();
        self.linenumbers.push(last + newline_count);
        let loc = self.current_location_for(idx);
        self.current = directive::classify(self.components[idx].field_name.as_deref(), &loc)?;
        Ok(true)
    }

    fn seek_to(&mut self, pos: i64) {
        let delta = pos - self.pos_index;
        self.pos_index = pos;
        let keep = (self.linenumbers.len() as i64 + delta).max(1) as usize;
        self.linenumbers.truncate(keep);
    }

    fn skip_until(&mut self, targets: &[&str], inc_level: &[&str], desc_level: &[&str]) -> Result<(), MextError> {
        let target_level = self.level;
        while self.step()? {
            let kw = self.current.keyword.clone();
            if let Some(k) = kw.as_deref() {
                if inc_level.contains(&k) {
                    self.level += 1;
                } else if desc_level.contains(&k) {
                    self.level -= 1;
                    if self.level == target_level - 1 && targets.contains(&k) {
                        return Ok(());
                    }
                } else if self.level == target_level && targets.contains(&k) {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn current_location(&self) -> SourceLocation {
        self.current_location_for(self.pos_index.max(0) as usize)
    }

    fn current_location_for(&self, idx: usize) -> SourceLocation {
        let token = self
            .components
            .get(idx)
            .and_then(|c| c.field_name.clone())
            .unwrap_or_default();
        SourceLocation::new(
            self.template_fn.as_ref().map(|p| p.display().to_string()),
            *self.linenumbers.last().unwrap_or(&1),
            token,
        )
    }

    // ---- output -------------------------------------------------------

    fn process_current_literal(&mut self) {
        let idx = self.pos_index as usize;
        let comp = self.components[idx].clone();
        let (flush, text) = self.whitespace.process_literal(
            comp.literal_text,
            idx,
            self.level,
            comp.field_name.is_some(),
            self.results.len(),
        );
        if !text.is_empty() {
            if let Some(f) = flush {
                if !f.is_empty() {
                    self.results.push(f);
                }
            }
            self.results.push(text.clone());
            self.tracer.record(idx, self.current.keyword.as_deref(), comp.field_name.as_deref(), &text);
        }
    }

    fn append_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let (flush, t) = self.whitespace.append(text);
        if !t.is_empty() {
            if let Some(f) = flush {
                if !f.is_empty() {
                    self.results.push(f);
                }
            }
            self.results.push(t.clone());
            self.tracer.record(
                self.pos_index as usize,
                self.current.keyword.as_deref(),
                self.current.statement.as_deref(),
                &t,
            );
        }
    }

    fn parsed_result_snapshot(&self) -> String {
        let joined = self.results.concat();
        if *self.options.get("final_strip").unwrap_or(&true) {
            joined.trim().to_string()
        } else {
            joined
        }
    }

    // ---- value access ---------------------------------------------------

    fn get_field_value(&self, field_name: &str) -> Result<Value, MextError> {
        resolve::resolve(field_name, &self.scope, || self.current_location())
    }

    fn resolve_format_spec(&self, format_spec: &str) -> Result<String, MextError> {
        if !format_spec.contains('{') {
            return Ok(format_spec.to_string());
        }
        let mut out = String::new();
        let mut chars = format_spec.chars();
        while let Some(c) = chars.next() {
            if c == '{' {
                let mut inner = String::new();
                for c2 in chars.by_ref() {
                    if c2 == '}' {
                        break;
                    }
                    inner.push(c2);
                }
                let v = self.get_field_value(inner.trim())?;
                out.push_str(&v.to_display_string());
            } else {
                out.push(c);
            }
        }
        Ok(out)
    }

    // ---- assertions -------------------------------------------------------

    fn assert_missing_statement(&self) -> Result<(), MextError> {
        if self.current.statement.is_none() {
            return Err(MextError::syntax(
                format!("Missing statement after {}", self.current.keyword.as_deref().unwrap_or("")),
                self.current_location(),
            ));
        }
        Ok(())
    }

    fn assert_unexpected_statement(&self) -> Result<(), MextError> {
        if self.current.statement.is_some() {
            return Err(MextError::syntax(
                format!("Unexpected statement after {}", self.current.keyword.as_deref().unwrap_or("")),
                self.current_location(),
            ));
        }
        Ok(())
    }

    // ---- directive handlers ------------------------------------------------

    fn parse_option(&mut self) -> Result<(), MextError> {
        self.assert_missing_statement()?;
        let statement = self.current.statement.clone().unwrap();
        let (name, val) = statement.split_once(' ').ok_or_else(|| {
            MextError::syntax(
                "Keyword \"option\" requires \"@option option_name (on|off)\" syntax.",
                self.current_location(),
            )
        })?;
        let flag = match val.trim() {
            "on" => true,
            "off" => false,
            _ => {
                return Err(MextError::syntax(
                    "The second parameter for keyword \"option\" should be \"on\" or \"off\".",
                    self.current_location(),
                ));
            }
        };
        self.options.insert(name.to_string(), flag);
        Ok(())
    }

    fn parse_set(&mut self) -> Result<(), MextError> {
        self.assert_missing_statement()?;
        let statement = self.current.statement.clone().unwrap();
        let (var1, var2) = statement.split_once(' ').ok_or_else(|| {
            MextError::syntax("Keyword \"set\" requires exactly two variables.", self.current_location())
        })?;
        let value = self.get_field_value(var2.trim())?;
        self.scope.set_local(var1.to_string(), value);
        Ok(())
    }

    fn parse_default(&mut self) -> Result<(), MextError> {
        self.assert_missing_statement()?;
        let statement = self.current.statement.clone().unwrap();
        let (var1, var2) = statement.split_once(' ').ok_or_else(|| {
            MextError::syntax("Keyword \"default\" requires exactly two variables.", self.current_location())
        })?;
        if !self.scope.has(var1) {
            let value = self.get_field_value(var2.trim())?;
            self.scope.set_local(var1.to_string(), value);
        }
        Ok(())
    }

    fn parse_count(&mut self) -> Result<(), MextError> {
        self.assert_missing_statement()?;
        let varname = self.current.statement.clone().unwrap();
        let new_value = match self.get_field_value(&varname) {
            Ok(Value::Int(i)) => Value::Int(i + 1),
            Ok(Value::Float(f)) => Value::Float(f + 1.0),
            _ => Value::Int(0),
        };
        self.scope.set_local(varname, new_value);
        Ok(())
    }

    fn parse_include(&mut self) -> Result<(), MextError> {
        self.assert_missing_statement()?;
        let statement = self.current.statement.clone().unwrap();
        let caps = INCLUDE_RE.captures(&statement).ok_or_else(|| {
            MextError::syntax(
                "Keyword \"include\" requires '@include (\"filename\"|filename_variable) [param=var,...]' syntax.",
                self.current_location(),
            )
        })?;

        let display_name = caps
            .name("filepath")
            .map(|m| m.as_str().to_string())
            .or_else(|| caps.name("filepath_var").map(|m| m.as_str().to_string()))
            .unwrap_or_default();

        let nested_template_fn = if let Some(m) = caps.name("filepath") {
            m.as_str().to_string()
        } else if let Some(m) = caps.name("filepath_var") {
            self.get_field_value(m.as_str())?.to_display_string()
        } else {
            return Err(MextError::runtime("Failed to identify include target.", self.current_location()));
        };

        let resolved = loader::resolve_include_path(&nested_template_fn, self.template_fn.as_deref())
            .ok_or_else(|| MextError::file_not_found(format!("File not found: \"{display_name}\"."), self.current_location()))?;

        let canonical = std::fs::canonicalize(&resolved).unwrap_or_else(|_| resolved.clone());
        if !self.include_stack.borrow_mut().insert(canonical.clone()) {
            return Err(MextError::runtime(
                format!("Cyclic include detected: \"{}\".", resolved.display()),
                self.current_location(),
            ));
        }

        let mut additional_params = IndexMap::new();
        if let Some(m) = caps.name("params") {
            for clause in m.as_str().split(',') {
                let clause = clause.trim();
                if let Some((key, val)) = clause.split_once('=') {
                    let value = self.get_field_value(val.trim())?;
                    additional_params.insert(key.trim().to_string(), value);
                }
            }
        }

        let load_result = self.template_loader.load(&resolved);
        let nested_source = match load_result {
            Ok(s) => s,
            Err(e) => {
                self.include_stack.borrow_mut().remove(&canonical);
                return Err(MextError::runtime(
                    format!("Failed to include file \"{display_name}\".\n{e}"),
                    self.current_location(),
                ));
            }
        };

        let mut merged_params = self.scope.params().clone();
        merged_params.extend(additional_params);

        let mut nested = Parser::new();
        nested.template_loader = Rc::clone(&self.template_loader);
        nested.include_stack = Rc::clone(&self.include_stack);
        nested.formatters = FormatterRegistry::new();
        let render_result = nested.render(nested_source, Some(resolved.clone()), merged_params, self.callbacks.clone());

        self.include_stack.borrow_mut().remove(&canonical);

        let nested_result = render_result.map_err(|e| {
            MextError::runtime(format!("Failed to include file \"{display_name}\".\n{e}"), self.current_location())
        })?;

        self.append_text(&nested_result);
        Ok(())
    }

    fn parse_input(&mut self) -> Result<(), MextError> {
        self.assert_missing_statement()?;
        let varname = self.current.statement.clone().unwrap();
        let callback = self
            .callbacks
            .get(&varname)
            .cloned()
            .ok_or_else(|| MextError::runtime(format!("Missing callback for input variable \"{varname}\"."), self.current_location()))?;

        let prefix = self.parsed_result_snapshot();
        let value = callback(&prefix)?;
        self.append_text(&value.to_display_string());
        self.scope.set_local(varname.clone(), value.clone());
        self.input_results.insert(varname, value);
        Ok(())
    }

    fn parse_import(&mut self) -> Result<(), MextError> {
        self.assert_missing_statement()?;
        let statement = self.current.statement.clone().unwrap();
        let caps = IMPORT_RE.captures(&statement).ok_or_else(|| {
            MextError::syntax(
                "Keyword \"import\" requires '@import (\"filename\"|filename_variable) [as varname]' syntax.",
                self.current_location(),
            )
        })?;

        let display_name = caps
            .name("filepath")
            .map(|m| m.as_str().to_string())
            .or_else(|| caps.name("filepath_var").map(|m| m.as_str().to_string()))
            .unwrap_or_default();

        let import_fn = if let Some(m) = caps.name("filepath") {
            m.as_str().to_string()
        } else if let Some(m) = caps.name("filepath_var") {
            self.get_field_value(m.as_str())?.to_display_string()
        } else {
            return Err(MextError::runtime("Failed to identify import target.", self.current_location()));
        };

        let resolved = loader::resolve_import_path(&import_fn, self.template_fn.as_deref())
            .ok_or_else(|| MextError::file_not_found(format!("File not found: \"{display_name}\"."), self.current_location()))?;

        let namespace = caps.name("namespace").map(|m| m.as_str().to_string());

        if config::is_supported_extension(&resolved) {
            let imported = config::load_config(&resolved).map_err(|e| {
                MextError::runtime(format!("Failed to import file \"{display_name}\".\n{e}"), self.current_location())
            })?;
            match namespace {
                Some(ns) => self.scope.set_local(ns, imported),
                None => {
                    if let Value::Map(m) = imported {
                        self.scope.merge_locals(m);
                    }
                }
            }
        } else {
            let Some(ns) = namespace else {
                return Err(MextError::syntax(
                    format!(
                        "Trying to import file \"{display_name}\" as text but missing the as clause. Usage: '@import \"text_file\" as varname'."
                    ),
                    self.current_location(),
                ));
            };
            let content = self.template_loader.load(&resolved).map_err(|e| {
                MextError::runtime(format!("Failed to import file \"{display_name}\".\n{e}"), self.current_location())
            })?;
            self.scope.set_local(ns, Value::Str(content));
        }
        Ok(())
    }

    fn test_statement(&self, statement: &str) -> Result<bool, MextError> {
        let caps = IF_RE.captures(statement).ok_or_else(|| {
            MextError::syntax(
                "Keyword \"if\" requires \"@if [not] [empty|undefined|novalue] varname\" syntax.",
                self.current_location(),
            )
        })?;
        let operators = caps.name("operators").map(|m| m.as_str()).unwrap_or("");
        let tokens: Vec<&str> = operators.split_whitespace().collect();
        let inverse = tokens.contains(&"not");
        let test_empty = tokens.contains(&"empty");
        let test_undefined = tokens.contains(&"undefined");
        let test_novalue = tokens.contains(&"novalue");
        let field_name = caps.name("varname").unwrap().as_str();

        let mut eval_result: Option<bool> = None;
        let mut field_value: Option<Value> = None;

        if test_undefined || test_novalue {
            match self.get_field_value(field_name) {
                Ok(v) => {
                    field_value = Some(v);
                    if test_undefined {
                        eval_result = Some(false);
                    }
                }
                Err(e) if e.is_runtime() => eval_result = Some(true),
                Err(e) => return Err(e),
            }
        } else {
            field_value = Some(self.get_field_value(field_name)?);
        }

        if eval_result.is_none() && (test_empty || test_novalue) {
            eval_result = Some(match &field_value {
                None => true,
                Some(v) => v.is_empty_test(),
            });
        }

        let mut result = match eval_result {
            Some(r) => r,
            None => field_value.as_ref().map(Value::is_truthy).unwrap_or(false),
        };
        if inverse {
            result = !result;
        }
        Ok(result)
    }

    fn parse_if(&mut self) -> Result<(), MextError> {
        self.assert_missing_statement()?;
        let statement = self.current.statement.clone().unwrap();
        let result = self.test_statement(&statement)?;
        if !result {
            self.skip_until(&["else", "elif", "endif"], &["if"], &["endif"])?;
            if self.current.keyword.as_deref() == Some("elif") {
                return self.parse_if();
            }
        }
        Ok(())
    }

    fn parse_elif(&mut self) -> Result<(), MextError> {
        self.skip_until(&["endif"], &["if"], &["endif"])
    }

    fn parse_else(&mut self) -> Result<(), MextError> {
        self.assert_unexpected_statement()?;
        self.skip_until(&["endif"], &["if"], &["endif"])
    }

    fn parse_endif(&mut self) -> Result<(), MextError> {
        self.assert_unexpected_statement()
    }

    fn bind_for_vars(&mut self, varnames: &[String], item: &ForItem) -> Result<(), MextError> {
        match item {
            ForItem::Single(v) => {
                if varnames.len() != 1 {
                    return Err(MextError::runtime(
                        "cannot unpack single value into multiple loop variables",
                        self.current_location(),
                    ));
                }
                self.scope.set_local(varnames[0].clone(), v.clone());
            }
            ForItem::Pair(k, v) => {
                if varnames.len() == 1 {
                    self.scope.set_local(varnames[0].clone(), Value::List(vec![k.clone(), v.clone()]));
                } else if varnames.len() == 2 {
                    self.scope.set_local(varnames[0].clone(), k.clone());
                    self.scope.set_local(varnames[1].clone(), v.clone());
                } else {
                    return Err(MextError::runtime(
                        "too many loop variables for mapping iteration",
                        self.current_location(),
                    ));
                }
            }
        }
        Ok(())
    }

    fn parse_for(&mut self) -> Result<(), MextError> {
        self.assert_missing_statement()?;
        let statement = self.current.statement.clone().unwrap();
        let caps = FOR_RE.captures(&statement).ok_or_else(|| {
            MextError::syntax("Keyword \"for\" requires \"@for item in iterable\" syntax.", self.current_location())
        })?;
        let varnames: SmallVec<[String; 2]> = caps
            .name("varnames")
            .unwrap()
            .as_str()
            .split(',')
            .map(|s| s.trim().to_string())
            .collect();
        let iterable_name = caps.name("iterable_name").unwrap().as_str().to_string();

        let iterable = self.get_field_value(&iterable_name)?;
        let mut items: VecDeque<ForItem> = match &iterable {
            Value::Map(m) => m.iter().map(|(k, v)| ForItem::Pair(Value::Str(k.clone()), v.clone())).collect(),
            Value::List(l) => l.iter().cloned().map(ForItem::Single).collect(),
            Value::Str(s) => s.chars().map(|c| ForItem::Single(Value::Str(c.to_string()))).collect(),
            _ => {
                return Err(MextError::runtime(
                    format!("\"{iterable_name}\" is not an iterable."),
                    self.current_location(),
                ));
            }
        };

        match items.pop_front() {
            Some(first) => {
                let entry_mark = self.pos_index;
                self.bind_for_vars(&varnames, &first)?;
                self.for_context.push(ForContext {
                    varnames,
                    remaining: items,
                    entry_mark,
                });
            }
            None => {
                self.skip_until(&["endfor"], &["for"], &["endfor"])?;
            }
        }
        Ok(())
    }

    fn parse_endfor(&mut self) -> Result<(), MextError> {
        self.assert_unexpected_statement()?;
        if self.for_context.is_empty() {
            return Err(MextError::syntax("Redundant keyword \"endfor\".", self.current_location()));
        }
        let has_next = !self.for_context.last().unwrap().remaining.is_empty();
        if has_next {
            let ctx = self.for_context.last_mut().unwrap();
            let next_item = ctx.remaining.pop_front().unwrap();
            let varnames = ctx.varnames.clone();
            let entry_mark = ctx.entry_mark;
            self.bind_for_vars(&varnames, &next_item)?;
            self.seek_to(entry_mark);
        } else {
            self.for_context.pop();
        }
        Ok(())
    }

    fn parse_trim_newline(&mut self) -> Result<(), MextError> {
        self.assert_unexpected_statement()?;
        if let Some(flush) = self.whitespace.take_pending_for_flush() {
            if !flush.is_empty() {
                self.results.push(flush);
            }
        }
        self.whitespace.begin_trim_newline(self.level, self.results.len());
        Ok(())
    }

    fn parse_format(&mut self) -> Result<(), MextError> {
        self.assert_missing_statement()?;
        let statement = self.current.statement.clone().unwrap();
        let mut parts = statement.splitn(2, ' ');
        let format_name = parts.next().unwrap().to_string();
        let rest = parts.next().ok_or_else(|| {
            MextError::syntax(
                "Missing statement, keyword \"format\" requires a format and an variable.",
                self.current_location(),
            )
        })?;
        let rest = rest.trim();

        let caps = FORMAT_ARG_RE
            .captures(rest)
            .ok_or_else(|| MextError::syntax("malformed \"format\" statement", self.current_location()))?;
        let field_name = caps.name("varname").unwrap().as_str().to_string();
        let field_value = self.get_field_value(&field_name)?;

        let mut params = IndexMap::new();
        if let Some(m) = caps.name("params") {
            for clause in m.as_str().split(',') {
                let clause = clause.trim();
                if let Some((k, v)) = clause.split_once('=') {
                    let value = self.get_field_value(v.trim())?;
                    params.insert(k.trim().to_string(), value);
                }
            }
        }

        let text = self.formatters.invoke(&format_name, &field_value, &params, || self.current_location())?;
        self.append_text(&text);
        Ok(())
    }

    fn parse_comment(&mut self) -> Result<(), MextError> {
        self.assert_unexpected_statement()?;
        // `comment`/`endcomment` never participate in the `if`/`for` level
        // counter, so this can't reuse `skip_until` (which mutates `level`
        // to compensate for closers it bypasses) — its body is walked with
        // its own, level-blind nesting count instead.
        let mut depth: i64 = 0;
        while self.step()? {
            match self.current.keyword.as_deref() {
                Some("comment") => depth += 1,
                Some("endcomment") => {
                    if depth == 0 {
                        return Ok(());
                    }
                    depth -= 1;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn parse_endcomment(&mut self) -> Result<(), MextError> {
        self.assert_unexpected_statement()?;
        Err(MextError::syntax("Redundant keyword \"endcomment\".", self.current_location()))
    }

    fn parse_field(&mut self) -> Result<(), MextError> {
        let idx = self.pos_index as usize;
        let comp = self.components[idx].clone();
        let field_name = comp.field_name.clone().unwrap();
        let value = self.get_field_value(&field_name)?;
        let format_spec = self.resolve_format_spec(&comp.format_spec)?;
        let text = apply_conversion_and_format(&value, comp.conversion, &format_spec, || self.current_location())?;
        self.append_text(&text);
        Ok(())
    }
}

fn apply_conversion_and_format(
    value: &Value,
    conversion: Option<char>,
    format_spec: &str,
    loc: impl Fn() -> SourceLocation,
) -> Result<String, MextError> {
    let base = match conversion {
        Some('r') => value.to_repr_string(),
        Some('s') => value.to_display_string(),
        Some('a') => value
            .to_display_string()
            .chars()
            .map(|c| if c.is_ascii() { c.to_string() } else { format!("\\u{:04x}", c as u32) })
            .collect(),
        Some(other) => return Err(MextError::syntax(format!("Unknown conversion character {other:?}"), loc())),
        None => value.to_display_string(),
    };

    if format_spec.is_empty() {
        Ok(base)
    } else {
        apply_format_spec(value, &base, format_spec)
    }
}

/// A pragmatic subset of Python's format mini-language:
/// `[[fill]align][sign][#][0][width][.precision][type]`.
fn apply_format_spec(value: &Value, base: &str, spec: &str) -> Result<String, MextError> {
    let chars: Vec<char> = spec.chars().collect();
    let n = chars.len();
    let mut i = 0;

    let mut fill = ' ';
    let mut align: Option<char> = None;
    if n >= 2 && "<>^=".contains(chars[1]) {
        fill = chars[0];
        align = Some(chars[1]);
        i = 2;
    } else if n >= 1 && "<>^=".contains(chars[0]) {
        align = Some(chars[0]);
        i = 1;
    }

    let mut sign = None;
    if i < n && "+- ".contains(chars[i]) {
        sign = Some(chars[i]);
        i += 1;
    }
    if i < n && chars[i] == '#' {
        i += 1;
    }
    let zero_pad = i < n && chars[i] == '0';
    if zero_pad {
        i += 1;
    }
    let mut width_str = String::new();
    while i < n && chars[i].is_ascii_digit() {
        width_str.push(chars[i]);
        i += 1;
    }
    let width: usize = width_str.parse().unwrap_or(0);

    let mut precision = None;
    if i < n && chars[i] == '.' {
        i += 1;
        let mut p = String::new();
        while i < n && chars[i].is_ascii_digit() {
            p.push(chars[i]);
            i += 1;
        }
        precision = p.parse::<usize>().ok();
    }
    let type_char = chars.get(i).copied();

    let mut body = match (value, type_char) {
        (Value::Int(v), Some('x')) => format!("{v:x}"),
        (Value::Int(v), Some('X')) => format!("{v:X}"),
        (Value::Int(v), Some('o')) => format!("{v:o}"),
        (Value::Int(v), Some('b')) => format!("{v:b}"),
        (Value::Int(v), _) => v.to_string(),
        (Value::Float(v), Some('f')) => format!("{:.*}", precision.unwrap_or(6), v),
        (Value::Float(v), Some('e')) => format!("{v:e}"),
        (Value::Float(v), _) => match precision {
            Some(p) => format!("{v:.p$}"),
            None => v.to_string(),
        },
        _ => match precision {
            Some(p) => base.chars().take(p).collect(),
            None => base.to_string(),
        },
    };

    if let Some(s) = sign {
        let non_negative = matches!(value, Value::Int(v) if *v >= 0) || matches!(value, Value::Float(v) if *v >= 0.0);
        if non_negative {
            if s == '+' {
                body = format!("+{body}");
            } else if s == ' ' {
                body = format!(" {body}");
            }
        }
    }

    let align = align.unwrap_or(if matches!(value, Value::Int(_) | Value::Float(_)) { '>' } else { '<' });
    let pad_char = if zero_pad { '0' } else { fill };
    let body_len = body.chars().count();
    if body_len < width {
        let pad_total = width - body_len;
        body = match align {
            '<' => format!("{body}{}", pad_char.to_string().repeat(pad_total)),
            '>' | '=' => format!("{}{body}", pad_char.to_string().repeat(pad_total)),
            '^' => {
                let left = pad_total / 2;
                let right = pad_total - left;
                format!(
                    "{}{body}{}",
                    pad_char.to_string().repeat(left),
                    pad_char.to_string().repeat(right)
                )
            }
            _ => body,
        };
    }

    Ok(body)
}
