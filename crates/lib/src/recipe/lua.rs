//! Lua recipes (`recipe.lua`).
//!
//! A recipe file returns a table:
//!
//! ```lua
//! local recipe = {
//!   name = "ff_cpp",
//!   version = "0.1.0",
//!   settings = { "os", "compiler", "build_type", "arch" },
//!   options = { shared = { true, false } },
//!   default_options = { shared = false },
//!   requires = { "ffmpeg/4.2.1@bincrafters/stable" },
//!   build_requires = { "catch2/2.11.0" },
//!   generators = { "cmake" },
//! }
//!
//! function recipe.build(ctx)
//!   ctx:cmake_configure({ source_folder = "ff_cpp" })
//!   ctx:cmake_build()
//! end
//!
//! return recipe
//! ```
//!
//! Stage functions receive a [`StageCtx`] userdata. They only record actions;
//! the executor runs them afterwards. Every call to a stage evaluates the file
//! in a fresh Lua state, so a recipe can be shared between threads.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use mlua::prelude::*;
use tracing::debug;

use crate::collect::ArtifactRule;
use crate::options::{ANY, OptionDecl, OptionValue};
use crate::recipe::{
  ConfigView, Generator, Recipe, RecipeError, RecipeMetadata, RecipeStages, StageAction, StageKind, StageRecord,
};
use crate::settings::SettingAxis;
use crate::util::hash::hash_bytes;

/// Name of the global table exposing `kiln.dir` to recipes.
const GLOBAL_TABLE: &str = "kiln";

/// Stage callbacks backed by a Lua recipe file.
#[derive(Debug, Clone)]
pub struct LuaStages {
  source: String,
  chunk_name: String,
  dir: Option<PathBuf>,
}

impl LuaStages {
  fn new_state(&self) -> LuaResult<(Lua, LuaTable)> {
    let lua = Lua::new();
    let globals = lua.create_table()?;
    if let Some(dir) = &self.dir {
      globals.set("dir", dir.to_string_lossy().to_string())?;
    }
    lua.globals().set(GLOBAL_TABLE, globals)?;

    let value = lua
      .load(&self.source)
      .set_name(format!("@{}", self.chunk_name))
      .eval::<LuaValue>()?;
    match value {
      LuaValue::Table(table) => Ok((lua, table)),
      _ => Err(LuaError::external("recipe must return a table")),
    }
  }
}

impl RecipeStages for LuaStages {
  fn record(&self, stage: StageKind, view: &ConfigView) -> Result<StageRecord, RecipeError> {
    let run = || -> LuaResult<StageRecord> {
      let (lua, table) = self.new_state()?;
      let Some(func) = table.get::<Option<LuaFunction>>(stage.as_str())? else {
        return Ok(StageRecord::default());
      };

      let ctx = StageCtx {
        stage,
        view: view.clone(),
        record: StageRecord::default(),
      };
      let ctx_userdata = lua.create_userdata(ctx)?;
      func.call::<LuaValue>(&ctx_userdata)?;

      let ctx: StageCtx = ctx_userdata.take()?;
      Ok(ctx.record)
    };

    let record = run().map_err(|source| RecipeError::Stage { stage, source })?;
    debug!(
      stage = %stage,
      actions = record.actions.len(),
      rules = record.rules.len(),
      "recorded stage"
    );
    Ok(record)
  }

  fn fingerprint(&self) -> String {
    hash_bytes(self.source.as_bytes()).0
  }
}

/// Load a recipe from a `recipe.lua` file.
pub fn load_recipe(path: &Path) -> Result<Recipe, RecipeError> {
  let canonical = path.canonicalize().map_err(|e| RecipeError::Load {
    path: path.display().to_string(),
    message: e.to_string(),
  })?;
  let source = std::fs::read_to_string(&canonical).map_err(|e| RecipeError::Load {
    path: canonical.display().to_string(),
    message: e.to_string(),
  })?;
  let stages = LuaStages {
    source,
    chunk_name: canonical.display().to_string(),
    dir: canonical.parent().map(Path::to_path_buf),
  };
  recipe_from_stages(stages)
}

/// Load a recipe from Lua source text. `chunk_name` appears in error messages.
pub fn recipe_from_source(source: &str, chunk_name: &str) -> Result<Recipe, RecipeError> {
  let stages = LuaStages {
    source: source.to_string(),
    chunk_name: chunk_name.to_string(),
    dir: None,
  };
  recipe_from_stages(stages)
}

fn recipe_from_stages(stages: LuaStages) -> Result<Recipe, RecipeError> {
  let (_lua, table) = stages.new_state()?;

  let name: String = table
    .get::<Option<String>>("name")?
    .ok_or_else(|| RecipeError::Invalid("recipe requires a 'name' field".into()))?;
  let version: String = table
    .get::<Option<String>>("version")?
    .ok_or_else(|| RecipeError::Invalid("recipe requires a 'version' field".into()))?;

  let metadata = RecipeMetadata {
    name: name.clone(),
    version: version.clone(),
    license: table.get("license")?,
    author: table.get("author")?,
    url: table.get("url")?,
    description: table.get("description")?,
  };

  let mut builder = Recipe::builder(name, version).metadata(metadata);

  if let Some(axes) = table.get::<Option<Vec<String>>>("settings")? {
    let axes = axes
      .iter()
      .map(|a| a.parse::<SettingAxis>())
      .collect::<Result<Vec<_>, _>>()?;
    builder = builder.settings(axes);
  }

  for decl in parse_options(&table)? {
    builder = builder.option(decl);
  }
  for req in table.get::<Option<Vec<String>>>("requires")?.unwrap_or_default() {
    builder = builder.requires(req);
  }
  for req in table.get::<Option<Vec<String>>>("build_requires")?.unwrap_or_default() {
    builder = builder.build_requires(req);
  }
  for generator in table.get::<Option<Vec<String>>>("generators")?.unwrap_or_default() {
    builder = builder.generator(generator.parse::<Generator>()?);
  }

  builder.stages(stages).build()
}

fn lua_to_option_value(value: LuaValue) -> LuaResult<OptionValue> {
  match value {
    LuaValue::Boolean(b) => Ok(OptionValue::Bool(b)),
    LuaValue::String(s) => Ok(OptionValue::Text(s.to_str()?.to_string())),
    LuaValue::Integer(i) => Ok(OptionValue::Text(i.to_string())),
    LuaValue::Number(n) => Ok(OptionValue::Text(n.to_string())),
    other => Err(LuaError::external(format!(
      "option values must be booleans, strings or numbers, got {}",
      other.type_name()
    ))),
  }
}

fn parse_options(table: &LuaTable) -> Result<Vec<OptionDecl>, RecipeError> {
  let Some(options) = table.get::<Option<LuaTable>>("options")? else {
    return Ok(Vec::new());
  };
  let defaults = table.get::<Option<LuaTable>>("default_options")?;

  let mut decls = Vec::new();
  for pair in options.pairs::<String, LuaValue>() {
    let (key, allowed_value) = pair?;
    let allowed = match allowed_value {
      LuaValue::Table(list) => list
        .sequence_values::<LuaValue>()
        .map(|v| v.and_then(lua_to_option_value))
        .collect::<LuaResult<Vec<_>>>()?,
      other => vec![lua_to_option_value(other)?],
    };

    let default = match &defaults {
      Some(d) => match d.get::<LuaValue>(key.as_str())? {
        LuaValue::Nil => None,
        v => Some(lua_to_option_value(v)?),
      },
      None => None,
    };
    let default = match default {
      Some(v) => v,
      None => match allowed.first() {
        Some(first) if *first != OptionValue::Text(ANY.to_string()) => first.clone(),
        _ => {
          return Err(RecipeError::Invalid(format!("option '{}' needs a default value", key)));
        }
      },
    };

    decls.push(OptionDecl::new(key, allowed, default));
  }
  Ok(decls)
}

/// The object passed to stage functions as `ctx`.
pub struct StageCtx {
  stage: StageKind,
  view: ConfigView,
  record: StageRecord,
}

impl StageCtx {
  fn push_action(&mut self, action: StageAction) -> LuaResult<()> {
    if !action.allowed_in().contains(&self.stage) {
      return Err(LuaError::external(format!(
        "this method is not available in the {} stage",
        self.stage
      )));
    }
    self.record.actions.push(action);
    Ok(())
  }

  fn require_stage(&self, method: &str, stages: &[StageKind]) -> LuaResult<()> {
    if stages.contains(&self.stage) {
      Ok(())
    } else {
      Err(LuaError::external(format!(
        "ctx:{}() is not available in the {} stage",
        method, self.stage
      )))
    }
  }
}

impl LuaUserData for StageCtx {
  fn add_fields<F: LuaUserDataFields<Self>>(fields: &mut F) {
    fields.add_field_method_get("settings", |lua, this| {
      let t = lua.create_table()?;
      let s = &this.view.settings;
      t.set("os", s.os.as_str())?;
      t.set("arch", s.arch.as_str())?;
      t.set("compiler", s.compiler.as_str())?;
      t.set("compiler_version", s.compiler_version.as_str())?;
      t.set("build_type", s.build_type.as_str())?;
      Ok(t)
    });
    fields.add_field_method_get("options", |lua, this| {
      let t = lua.create_table()?;
      for (key, value) in &this.view.options {
        match value {
          OptionValue::Bool(b) => t.set(key.as_str(), *b)?,
          OptionValue::Text(s) => t.set(key.as_str(), s.as_str())?,
        }
      }
      Ok(t)
    });
    fields.add_field_method_get("build_type", |_, this| Ok(this.view.build_type.as_str()));
    fields.add_field_method_get("stage", |_, this| Ok(this.stage.as_str()));
  }

  fn add_methods<M: LuaUserDataMethods<Self>>(methods: &mut M) {
    methods.add_method_mut("run", |_, this, opts: LuaValue| {
      let action = parse_run(opts)?;
      this.push_action(action)
    });

    methods.add_method_mut("git_clone", |_, this, opts: LuaValue| {
      let action = match opts {
        LuaValue::String(url) => StageAction::GitClone {
          url: url.to_str()?.to_string(),
          rev: None,
          dir: None,
        },
        LuaValue::Table(t) => StageAction::GitClone {
          url: t
            .get::<Option<String>>("url")?
            .ok_or_else(|| LuaError::external("git_clone() requires a 'url' field"))?,
          rev: t.get("rev")?,
          dir: t.get("dir")?,
        },
        _ => return Err(LuaError::external("git_clone() expects a url or a table")),
      };
      this.push_action(action)
    });

    methods.add_method_mut("cmake_configure", |_, this, opts: Option<LuaTable>| {
      let mut definitions = BTreeMap::new();
      let mut source_folder = None;
      if let Some(t) = opts {
        source_folder = t.get("source_folder")?;
        if let Some(defs) = t.get::<Option<LuaTable>>("definitions")? {
          for pair in defs.pairs::<String, LuaValue>() {
            let (key, value) = pair?;
            definitions.insert(key, cmake_value(value)?);
          }
        }
      }
      this.push_action(StageAction::CMakeConfigure {
        source_folder,
        definitions,
      })
    });

    methods.add_method_mut("cmake_build", |_, this, opts: Option<LuaTable>| {
      let target = match opts {
        Some(t) => t.get("target")?,
        None => None,
      };
      this.push_action(StageAction::CMakeBuild { target })
    });

    methods.add_method_mut("copy", |_, this, (pattern, opts): (String, Option<LuaTable>)| {
      this.require_stage("copy", &[StageKind::Package, StageKind::Imports])?;
      let mut rule = ArtifactRule::new(pattern, "");
      if let Some(t) = opts {
        rule.dst = t.get::<Option<String>>("dst")?.unwrap_or_default();
        rule.src = t.get("src")?;
        rule.keep_path = t.get::<Option<bool>>("keep_path")?.unwrap_or(true);
      }
      this.record.rules.push(rule);
      Ok(())
    });

    methods.add_method_mut("libs", |_, this, names: LuaValue| {
      this.require_stage("libs", &[StageKind::PackageInfo])?;
      this.record.info.libs.extend(string_list(names)?);
      Ok(())
    });

    methods.add_method_mut("defines", |_, this, names: LuaValue| {
      this.require_stage("defines", &[StageKind::PackageInfo])?;
      this.record.info.defines.extend(string_list(names)?);
      Ok(())
    });

    methods.add_method_mut("system_libs", |_, this, names: LuaValue| {
      this.require_stage("system_libs", &[StageKind::PackageInfo])?;
      this.record.info.system_libs.extend(string_list(names)?);
      Ok(())
    });
  }
}

fn parse_run(opts: LuaValue) -> LuaResult<StageAction> {
  match opts {
    LuaValue::String(s) => Ok(StageAction::run(s.to_str()?.to_string())),
    LuaValue::Table(table) => {
      let command: String = table
        .get::<Option<String>>("cmd")?
        .ok_or_else(|| LuaError::external("run() table requires a 'cmd' field"))?;
      let cwd: Option<String> = table.get("cwd")?;
      let mut env = BTreeMap::new();
      if let Some(env_table) = table.get::<Option<LuaTable>>("env")? {
        for pair in env_table.pairs::<String, String>() {
          let (key, value) = pair?;
          env.insert(key, value);
        }
      }
      Ok(StageAction::Run { command, cwd, env })
    }
    _ => Err(LuaError::external("run() expects a string or table with 'cmd' field")),
  }
}

fn cmake_value(value: LuaValue) -> LuaResult<String> {
  match value {
    LuaValue::Boolean(true) => Ok("ON".to_string()),
    LuaValue::Boolean(false) => Ok("OFF".to_string()),
    LuaValue::String(s) => Ok(s.to_str()?.to_string()),
    LuaValue::Integer(i) => Ok(i.to_string()),
    LuaValue::Number(n) => Ok(n.to_string()),
    other => Err(LuaError::external(format!(
      "cmake definitions must be scalars, got {}",
      other.type_name()
    ))),
  }
}

fn string_list(value: LuaValue) -> LuaResult<Vec<String>> {
  match value {
    LuaValue::String(s) => Ok(vec![s.to_str()?.to_string()]),
    LuaValue::Table(t) => t.sequence_values::<String>().collect(),
    _ => Err(LuaError::external("expected a string or a list of strings")),
  }
}
