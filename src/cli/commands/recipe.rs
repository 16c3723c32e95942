//! `pipewright recipe` commands.

use anyhow::{anyhow, Context, Result};
use clap::Subcommand;
use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::cli::context::Engine;
use crate::cli::output::{list_table, output, render_list, CommandOutput};
use crate::domain::models::{Recipe, Stage};

/// `pipewright recipe` subcommands.
#[derive(Subcommand, Debug)]
pub enum RecipeCommands {
    /// Import recipes from a YAML file (one recipe or a list)
    Import {
        file: PathBuf,

        /// Workspace to assign, overriding any workspace_id in the file
        #[arg(short, long)]
        workspace: Option<Uuid>,
    },

    /// Show the recipe for one stage
    Show {
        #[arg(short, long)]
        workspace: Uuid,

        #[arg(short, long)]
        stage: String,
    },

    /// List a workspace's recipes
    List {
        #[arg(short, long)]
        workspace: Uuid,
    },
}

/// Parse a recipe file. A top-level sequence holds several recipes.
pub fn parse_recipes(yaml: &str, workspace: Option<Uuid>) -> Result<Vec<Recipe>> {
    let value: serde_yaml::Value = serde_yaml::from_str(yaml).context("Invalid YAML")?;
    let entries = match value {
        serde_yaml::Value::Sequence(items) => items,
        other => vec![other],
    };

    entries
        .into_iter()
        .enumerate()
        .map(|(index, mut entry)| {
            if let (Some(ws), serde_yaml::Value::Mapping(map)) = (workspace, &mut entry) {
                map.insert("workspace_id".into(), ws.to_string().into());
            }
            serde_yaml::from_value::<Recipe>(entry)
                .with_context(|| format!("Recipe #{} is invalid", index + 1))
        })
        .collect()
}

#[derive(Debug, Serialize)]
struct ImportOutput {
    imported: Vec<String>,
}

impl CommandOutput for ImportOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![format!("Imported {} recipe(s):", self.imported.len())];
        lines.extend(self.imported.iter().map(|r| format!("  {r}")));
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
struct RecipeOutput {
    recipe: Recipe,
}

impl CommandOutput for RecipeOutput {
    fn to_human(&self) -> String {
        let recipe = &self.recipe;
        let mut lines = vec![
            format!("Stage:        {}", recipe.stage),
            format!("Workspace:    {}", recipe.workspace_id),
            format!("On fail:      {}", recipe.config.on_fail_behavior.as_str()),
            format!(
                "Strictness:   {}",
                recipe
                    .config
                    .verification_strictness
                    .map_or("(config default)", |s| s.as_str())
            ),
            format!("Auto-advance: {}", recipe.config.auto_advance),
        ];
        if !recipe.steps.is_empty() {
            lines.push("Steps:".to_string());
            for step in recipe.ordered_steps() {
                lines.push(format!(
                    "  {}. {} [{}] {} criteria",
                    step.order,
                    step.name,
                    step.skill_id,
                    step.verification_criteria.len()
                ));
            }
        }
        if !recipe.gates.is_empty() {
            lines.push("Gates:".to_string());
            for gate in &recipe.gates {
                let required = if gate.required { "required" } else { "optional" };
                lines.push(format!("  {} ({}, {required})", gate.id, gate.gate_type.as_str()));
            }
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
struct RecipeListOutput {
    recipes: Vec<Recipe>,
    total: usize,
}

impl CommandOutput for RecipeListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["stage", "steps", "gates", "on fail", "auto-advance"]);
        for recipe in &self.recipes {
            table.add_row(vec![
                recipe.stage.to_string(),
                recipe.steps.len().to_string(),
                recipe.gates.len().to_string(),
                recipe.config.on_fail_behavior.as_str().to_string(),
                recipe.config.auto_advance.to_string(),
            ]);
        }
        render_list("recipe", &table, self.total)
    }
}

async fn read_file(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

/// Run a recipe subcommand.
pub async fn execute(command: RecipeCommands, engine: &Engine, json_mode: bool) -> Result<()> {
    match command {
        RecipeCommands::Import { file, workspace } => {
            let recipes = parse_recipes(&read_file(&file).await?, workspace)?;
            let mut imported = Vec::with_capacity(recipes.len());
            for recipe in &recipes {
                engine.recipes.save(recipe).await?;
                imported.push(format!("{}/{}", recipe.workspace_id, recipe.stage));
            }
            output(&ImportOutput { imported }, json_mode);
        }
        RecipeCommands::Show { workspace, stage } => {
            let stage = Stage::from_str(&stage).ok_or_else(|| anyhow!("Unknown stage: {stage}"))?;
            let recipe = engine
                .recipes
                .get(workspace, stage)
                .await?
                .ok_or_else(|| anyhow!("No recipe for stage {stage} in workspace {workspace}"))?;
            output(&RecipeOutput { recipe }, json_mode);
        }
        RecipeCommands::List { workspace } => {
            let recipes = engine.recipes.list(workspace).await?;
            let total = recipes.len();
            output(&RecipeListOutput { recipes, total }, json_mode);
        }
    }
    Ok(())
}
