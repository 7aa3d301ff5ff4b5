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

use git2::{ErrorCode, Oid, Repository};

use crate::error::Result;

/// A single candidate resolution: the full ref name (or bare hash) the
/// commitish matched against, and the commit it resolves to.
pub struct RefCommit {
    pub ref_name: String,
    pub commit: Oid,
}

/// Resolves `commitish` the same way `git/lookup.go` does: tags first, then
/// non-head/non-tag refs by name suffix, then full/prefix commit hashes.
/// The first resolver that returns anything (a hit or an error) wins -- see
/// spec §4.6.
pub fn lookup(repo: &Repository, commitish: &str) -> Result<Vec<RefCommit>> {
    let tags = lookup_tag(repo, commitish)?;
    if !tags.is_empty() {
        return Ok(tags);
    }

    let refs = lookup_ref(repo, commitish)?;
    if !refs.is_empty() {
        return Ok(refs);
    }

    lookup_commit(repo, commitish)
}

fn lookup_tag(repo: &Repository, tag: &str) -> Result<Vec<RefCommit>> {
    let refs = repo.references_glob("refs/tags/*")?;
    for r in refs {
        let r = r?;
        let Some(name) = r.shorthand() else { continue };
        if name != tag {
            continue;
        }

        let Some(oid) = r.target() else { continue };
        let Ok(tag_obj) = repo.find_tag(oid) else { continue };
        let Ok(commit) = tag_obj.target().and_then(|o| o.peel_to_commit()) else {
            continue;
        };

        return Ok(vec![RefCommit {
            ref_name: tag_obj.name().unwrap_or(tag).to_owned(),
            commit: commit.id(),
        }]);
    }

    Ok(Vec::new())
}

fn lookup_ref(repo: &Repository, commitish: &str) -> Result<Vec<RefCommit>> {
    let suffix = format!("/{commitish}");
    let mut commits = Vec::new();

    for r in repo.references()? {
        let r = r?;
        let Some(name) = r.name() else { continue };
        if name.starts_with("refs/heads/") || name.starts_with("refs/tags/") {
            continue;
        }

        if !name.ends_with(&suffix) {
            continue;
        }

        let Some(oid) = r.target() else { continue };
        match repo.find_commit(oid) {
            Ok(commit) => commits.push(RefCommit {
                ref_name: name.to_owned(),
                commit: commit.id(),
            }),
            Err(err) if err.code() == ErrorCode::NotFound => continue,
            Err(err) => return Err(err.into()),
        }
    }

    Ok(commits)
}

fn lookup_commit(repo: &Repository, commitish: &str) -> Result<Vec<RefCommit>> {
    if commitish.len() < 5 {
        return Ok(Vec::new());
    }

    if commitish.len() == 40 {
        let oid = match Oid::from_str(commitish) {
            Ok(oid) => oid,
            Err(_) => return Ok(Vec::new()),
        };

        return match repo.find_commit(oid) {
            Ok(commit) => Ok(vec![RefCommit {
                ref_name: commitish.to_owned(),
                commit: commit.id(),
            }]),
            Err(err) if err.code() == ErrorCode::NotFound => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        };
    }

    let mut commits = Vec::new();
    let odb = repo.odb()?;
    odb.foreach(|oid| {
        let hex = oid.to_string();
        if hex.starts_with(commitish) {
            if let Ok(commit) = repo.find_commit(*oid) {
                commits.push(RefCommit {
                    ref_name: hex,
                    commit: commit.id(),
                });
            }
        }
        true
    })?;

    Ok(commits)
}
