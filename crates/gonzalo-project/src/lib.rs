/*
 *        Copyright (c) 2022-2023 Dinu Blanovschi
 *
 *    Licensed under the Apache License, Version 2.0 (the "License");
 *    you may not use this file except in compliance with the License.
 *    You may obtain a copy of the License at
 *
 *        https://www.apache.org/licenses/LICENSE-2.0
 *
 *    Unless required by applicable law or agreed to in writing, software
 *    distributed under the License is distributed on an "AS IS" BASIS,
 *    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *    See the License for the specific language governing permissions and
 *    limitations under the License.
 */

//! Binds a [`gonzalo_git::GitRepo`] to a checked-in `.deploy` recipe,
//! yielding typed per-environment deployment parameters for a commitish.

mod config;
mod error;
mod project;

pub use config::{Command, Config, Env, Role};
pub use error::{ProjectError, Result};
pub use project::{Project, DEFAULT_RECIPE_FILE};
