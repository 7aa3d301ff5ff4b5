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

#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("git error: {0}")]
    Git(#[from] gonzalo_git::GitError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid recipe yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("env {0} is not defined")]
    EnvNotDefined(String),
}

pub type Result<T> = std::result::Result<T, ProjectError>;
