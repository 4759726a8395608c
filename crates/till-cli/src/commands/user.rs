use serde::Serialize;
use till_core::models::{Role, User, UserDraft};

use crate::commands::common::{open_service, open_session, print_json, resolve_id, short_id, Context};
use crate::error::CliError;

/// User row without the PIN.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserListItem {
    pub id: String,
    pub name: String,
    pub role: Role,
    pub permissions: Vec<String>,
}

pub fn user_to_list_item(user: &User) -> UserListItem {
    UserListItem {
        id: user.id.clone(),
        name: user.name.clone(),
        role: user.role,
        permissions: user.permissions.clone(),
    }
}

/// Create a user. Without any users yet no operator PIN is needed.
pub async fn run_user_add(ctx: &Context, draft: UserDraft) -> Result<(), CliError> {
    let service = open_service(ctx).await?;
    let bootstrap = service.users().await.is_empty();
    if !bootstrap {
        let pin = ctx.pin.as_deref().ok_or(CliError::PinRequired)?;
        service.login(pin).await?;
    }

    let user = service.create_user(draft).await?;
    if bootstrap {
        println!("Created admin {} ({})", user.name, user.id);
    } else {
        println!("Created user {} ({})", user.name, user.id);
    }
    Ok(())
}

pub async fn run_user_list(ctx: &Context, as_json: bool) -> Result<(), CliError> {
    let service = open_service(ctx).await?;
    let items = service
        .users()
        .await
        .iter()
        .map(user_to_list_item)
        .collect::<Vec<_>>();

    if as_json {
        return print_json(&items);
    }
    if items.is_empty() {
        println!("No users. Create the first one with `till user add <NAME> --user-pin <PIN>`.");
        return Ok(());
    }
    for item in &items {
        let role = match item.role {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Cashier => "cashier",
        };
        println!(
            "{:<13}  {:<20}  {role:<8}  {}",
            short_id(&item.id),
            item.name,
            item.permissions.join(",")
        );
    }
    Ok(())
}

pub async fn run_user_delete(ctx: &Context, id: &str) -> Result<(), CliError> {
    let service = open_session(ctx).await?;
    let users = service.users().await;
    let user_id = resolve_id(id, users.iter().map(|u| u.id.as_str()), "user")?;

    service.delete_user(&user_id).await?;
    println!("Deleted user {user_id}");
    Ok(())
}
