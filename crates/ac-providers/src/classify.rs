//! Maps a shell command line a provider is about to run onto the
//! [`ApprovalCategory`] it falls under, if any. Both adapters intercept
//! `requires_approval_for` categories before the command reaches the PTY
//! (§4.6, §4.5).

use ac_protocol::model::ApprovalCategory;

pub fn classify_command(command: &str) -> Option<ApprovalCategory> {
    let lower = command.to_lowercase();

    if lower.contains("git push") || lower.contains("git merge") || lower.contains("gh pr merge") {
        return Some(ApprovalCategory::Merge);
    }
    if lower.contains("npm install")
        || lower.contains("npm i ")
        || lower.contains("yarn add")
        || lower.contains("pnpm add")
        || lower.contains("cargo add")
        || lower.contains("pip install")
        || lower.contains("poetry add")
    {
        return Some(ApprovalCategory::DepsAdd);
    }
    if lower.contains(".env")
        || lower.contains("secret")
        || lower.contains(".ssh")
        || lower.contains("credentials")
    {
        return Some(ApprovalCategory::Secrets);
    }
    if lower.contains("kubectl apply")
        || lower.contains("terraform apply")
        || lower.contains("docker push")
        || lower.starts_with("deploy")
        || lower.contains(" deploy ")
    {
        return Some(ApprovalCategory::Deploy);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_categories() {
        assert_eq!(classify_command("git push origin main"), Some(ApprovalCategory::Merge));
        assert_eq!(classify_command("npm install left-pad"), Some(ApprovalCategory::DepsAdd));
        assert_eq!(classify_command("cat .env"), Some(ApprovalCategory::Secrets));
        assert_eq!(classify_command("terraform apply -auto-approve"), Some(ApprovalCategory::Deploy));
    }

    #[test]
    fn leaves_ordinary_commands_unclassified() {
        assert_eq!(classify_command("cargo test"), None);
        assert_eq!(classify_command("ls -la"), None);
    }
}
